/// Key layout for the fjall partitions
///
/// Partition structure:
/// - `downloads`: download:{id} -> Download (JSON)
/// - `requests`: request:{id} -> Request (JSON)
/// - `request_index`: by_download:{download_id}:{request_id} -> empty
/// - `hooks`: hook:{id} -> HookRecord (JSON)
///
/// Ids are UUIDv7 in hyphenated form, so key order is creation order.
use uuid::Uuid;

pub fn encode_download_key(id: Uuid) -> Vec<u8> {
    format!("download:{}", id).into_bytes()
}

pub fn encode_request_key(id: Uuid) -> Vec<u8> {
    format!("request:{}", id).into_bytes()
}

pub fn encode_hook_key(id: Uuid) -> Vec<u8> {
    format!("hook:{}", id).into_bytes()
}

pub fn encode_index_key(download_id: Uuid, request_id: Uuid) -> Vec<u8> {
    format!("by_download:{}:{}", download_id, request_id).into_bytes()
}

/// Prefix for a range scan over one download's requests: by_download:{download_id}:
pub fn encode_index_prefix(download_id: Uuid) -> Vec<u8> {
    format!("by_download:{}:", download_id).into_bytes()
}

/// by_download:{download_id}:{request_id} -> request_id
pub fn decode_index_key(key: &[u8]) -> Option<Uuid> {
    let key_str = std::str::from_utf8(key).ok()?;
    let rest = key_str.strip_prefix("by_download:")?;
    let (_, request_id) = rest.split_once(':')?;
    Uuid::parse_str(request_id).ok()
}
