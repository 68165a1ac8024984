use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::models::retry::RetryConfig;

type HmacSha256 = Hmac<Sha256>;

/// Exponential backoff delay for the given attempt number (1-based), with
/// ±10% jitter, capped at `max_delay_ms`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw = config
        .base_delay_ms
        .saturating_mul(u64::from(config.backoff_factor).saturating_pow(exponent));
    let capped = raw.min(config.max_delay_ms);

    let jitter = rand::random_range(-0.1..=0.1);
    let jittered = (capped as f64 * (1.0 + jitter)) as u64;

    Duration::from_millis(jittered)
}

/// Verify a hex-encoded HMAC-SHA256 signature over the raw request body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

/// Hex-encoded HMAC-SHA256 signature, as gateways (and tests) produce it.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Substitute `{{name}}` placeholders from metadata variables. An unreplaced
/// placeholder after substitution is an error (the message would go out with
/// a visible hole in it).
pub fn render_placeholders(
    template: &str,
    variables: &HashMap<String, serde_json::Value>,
) -> Result<String, String> {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);

        let replacement = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            _ => {
                return Err(format!("unsupported variable type for key '{}'", key));
            }
        };

        result = result.replace(&placeholder, &replacement);
    }

    if let Some(start) = result.find("{{") {
        if let Some(end) = result[start..].find("}}") {
            let missing = &result[start..start + end + 2];
            warn!(missing_variable = %missing, "template contains unreplaced variable");
            return Err(format!("missing variable in template: {}", missing));
        }
    }

    Ok(result)
}
