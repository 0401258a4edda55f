use chrono::{DateTime, Utc};
use rand::{thread_rng, Rng};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn random_base36(length: usize) -> String {
    let mut rng = thread_rng();
    (0..length)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `ses_<unix millis>_<13 base36 chars>`
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    format!("ses_{}_{}", now.timestamp_millis(), random_base36(13))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shape() {
        let now = Utc::now();
        let id = generate_session_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ses");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 13);
        assert!(parts[2].bytes().all(|b| BASE36.contains(&b)));
        assert_ne!(generate_session_id(now), id);
    }
}
