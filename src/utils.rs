use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;
use rand::distr::Alphanumeric;

pub fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 生成随机的 x-rpc-device_id
pub fn generate_device_id() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

/// 于本地生成 device_fp
pub fn generate_fp_locally() -> String {
    const CHARS: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..13)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

/// Headers 中的 DS（不带请求体和参数）
pub fn generate_ds(salt: &str) -> String {
    let t = now_secs();
    let r: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let c = md5_hex(&format!("salt={salt}&t={t}&r={r}"));
    format!("{t},{r},{c}")
}

/// 以指定时区格式化 Unix 时间戳
pub fn format_timestamp(ts: i64, tz: Tz) -> String {
    match tz.timestamp_opt(ts, 0).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn device_ids_are_upper_uuid() {
        let id = generate_device_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_uppercase());
        assert_ne!(id, generate_device_id());
    }

    #[test]
    fn device_fp_is_13_hex_chars() {
        let fp = generate_fp_locally();
        assert_eq!(fp.len(), 13);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ds_has_three_parts_and_valid_hash() {
        let ds = generate_ds("salt");
        let parts: Vec<&str> = ds.split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 6);
        let expected = md5_hex(&format!("salt=salt&t={}&r={}", parts[0], parts[1]));
        assert_eq!(parts[2], expected);
    }

    #[test]
    fn formats_in_timezone() {
        // 2023-05-01 00:00:00 UTC
        assert_eq!(
            format_timestamp(1682899200, chrono_tz::Asia::Shanghai),
            "2023-05-01 08:00:00"
        );
    }
}
