use crate::models::CommandBlock;
use sha2::{Digest, Sha256};

/// Length of the identifier kept from the SHA-256 digest of a rendered
/// command stream.
pub const TEMPLATE_HASH_LEN: usize = 12;

/// Render the full command stream for a device: each block contributes a
/// `! Block: <name>` header followed by its commands. Previews show this
/// text verbatim and the runner hashes the same text, so the preview hash and
/// the persisted template hash always agree.
pub fn render_command_stream(blocks: &[CommandBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        text.push_str("! Block: ");
        text.push_str(&block.name);
        text.push('\n');
        for command in &block.commands {
            text.push_str(command);
            text.push('\n');
        }
    }
    text
}

/// First 12 lowercase hex characters of SHA-256 over the rendered stream.
pub fn template_hash(stream: &str) -> String {
    let digest = Sha256::digest(stream.as_bytes());
    digest
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<String>()[..TEMPLATE_HASH_LEN]
        .to_string()
}
