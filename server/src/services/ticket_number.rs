use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const TICKET_PREFIX: &str = "TKT";

/// `TKT-<intent digest>-<random>`. The intent part keeps numbers from
/// different intents apart; the random part keeps regenerations apart.
/// No counter is involved, so concurrent issuance cannot allocate the same value.
pub fn generate(intent_id: &str) -> String {
    let digest = Sha256::digest(intent_id.as_bytes());
    let nonce = Uuid::new_v4();

    format!(
        "{}-{}-{}",
        TICKET_PREFIX,
        hex::encode_upper(&digest[..4]),
        hex::encode_upper(&nonce.as_bytes()[..4])
    )
}
