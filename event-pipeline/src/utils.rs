use rand::RngCore;
use uuid::Uuid;

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut ret = [0u8; N];
    rand::thread_rng().fill_bytes(&mut ret);
    ret
}

/// Time-ordered event id, so ids sort by ingestion time in the history store.
pub fn event_id() -> String {
    Uuid::now_v7().to_string()
}

/// 16 lowercase hex characters. Not coordinated across processes: two
/// replicas can in principle draw the same value.
pub fn correlation_id() -> String {
    hex::encode(random_bytes::<8>())
}
