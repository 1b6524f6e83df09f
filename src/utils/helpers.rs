use chrono::Utc;
use rand::Rng;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            message: Some(message),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            message: None,
            data: None,
            error: Some(message),
        }
    }
}

const ID_SUFFIX_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ID_SUFFIX_LEN: usize = 4;

/// Request IDs are `REQ-<UTC second stamp>-<random suffix>`. Uniqueness is
/// probabilistic; `Request::create` checks the store for collisions.
pub fn generate_request_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_CHARS[rng.gen_range(0..ID_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("REQ-{}-{}", stamp, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_shape() {
        let id = generate_request_id();
        assert!(id.starts_with("REQ-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 14);
        assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
    }

    #[test]
    fn request_ids_rarely_collide() {
        let a = generate_request_id();
        let b = generate_request_id();
        // Same second, different random suffix.
        assert_ne!(a, b);
    }
}
