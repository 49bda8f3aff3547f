//! Worker-auth ALPN offer codec.
//!
//! A worker smuggles its wrapped credentials into the ClientHello as a run of
//! ALPN protocol names:
//!
//! ```text
//! v1workerauth-00<fragment>
//! v1workerauth-01<fragment>
//! ...
//! ```
//!
//! The two-digit ordinal numbers the fragments. Reassembly follows the
//! ordinal, not the position in the offer, and the ordinals must run
//! `00, 01, ..` without gaps or repeats.

use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Prefix shared by every worker-auth protocol name.
pub const WORKER_AUTH_PREFIX: &str = "v1workerauth-";

/// Width of the fragment ordinal that follows the prefix.
pub const ORDINAL_WIDTH: usize = 2;

/// Longest protocol name TLS allows in an ALPN list.
pub const MAX_PROTOCOL_NAME_LEN: usize = 255;

const MAX_FRAGMENTS: usize = 100;

const MAX_FRAGMENT_LEN: usize = MAX_PROTOCOL_NAME_LEN - WORKER_AUTH_PREFIX.len() - ORDINAL_WIDTH;

/// A recognised worker-auth offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAuthOffer {
    /// First matching protocol name in encounter order. The scoped server
    /// configuration allows exactly this name.
    pub protocol: String,
    /// Fragments joined in ordinal order.
    pub payload: String,
}

/// Find the worker-auth entries in `protocols` and reassemble their payload.
///
/// # Errors
/// - [`AuthError::NoCredentialOffered`] when no entry carries the prefix.
/// - [`AuthError::MalformedPayload`] when an entry's ordinal is missing or not
///   two decimal digits, or the ordinals repeat or leave a gap.
pub fn parse_offer<S: AsRef<str>>(protocols: &[S]) -> AuthResult<WorkerAuthOffer> {
    let mut first_match: Option<&str> = None;
    let mut fragments: Vec<(usize, &str)> = Vec::new();

    for name in protocols {
        let name = name.as_ref();
        let Some(rest) = name.strip_prefix(WORKER_AUTH_PREFIX) else {
            continue;
        };
        first_match.get_or_insert(name);

        let ordinal = rest.get(..ORDINAL_WIDTH).ok_or_else(|| {
            AuthError::MalformedPayload(format!(
                "protocol entry {} lacks a fragment ordinal",
                fragments.len()
            ))
        })?;
        let ordinal = parse_ordinal(ordinal)?;
        fragments.push((ordinal, &rest[ORDINAL_WIDTH..]));
    }

    let protocol = first_match.ok_or(AuthError::NoCredentialOffered)?;

    fragments.sort_by_key(|(ordinal, _)| *ordinal);
    for (expected, (ordinal, _)) in fragments.iter().enumerate() {
        if *ordinal != expected {
            return Err(AuthError::MalformedPayload(format!(
                "fragment ordinals out of sequence: expected {:02}, found {:02}",
                expected, ordinal
            )));
        }
    }

    let payload: String = fragments.iter().map(|(_, fragment)| *fragment).collect();
    debug!(
        "Reassembled worker-auth payload from {} fragment(s), {} bytes",
        fragments.len(),
        payload.len()
    );

    Ok(WorkerAuthOffer {
        protocol: protocol.to_string(),
        payload,
    })
}

fn parse_ordinal(ordinal: &str) -> AuthResult<usize> {
    if !ordinal.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::MalformedPayload(format!(
            "fragment ordinal {:?} is not two decimal digits",
            ordinal
        )));
    }
    Ok(ordinal
        .bytes()
        .fold(0usize, |acc, digit| acc * 10 + usize::from(digit - b'0')))
}

/// Split an encoded payload into worker-auth protocol names.
///
/// Each name fits the 255-byte ALPN limit. The result is ordered by ordinal.
///
/// # Errors
/// - [`AuthError::MalformedPayload`] if the payload is not ASCII.
/// - [`AuthError::OfferTooLarge`] if more than 100 fragments would be needed.
pub fn encode_offer(payload: &str) -> AuthResult<Vec<String>> {
    if !payload.is_ascii() {
        return Err(AuthError::MalformedPayload(
            "payload must be ASCII".to_string(),
        ));
    }

    let fragments = payload.len().div_ceil(MAX_FRAGMENT_LEN).max(1);
    if fragments > MAX_FRAGMENTS {
        return Err(AuthError::OfferTooLarge { fragments });
    }

    let bytes = payload.as_bytes();
    let names = (0..fragments)
        .map(|ordinal| {
            let start = (ordinal * MAX_FRAGMENT_LEN).min(bytes.len());
            let end = ((ordinal + 1) * MAX_FRAGMENT_LEN).min(bytes.len());
            // ASCII checked above, so every byte offset is a char boundary
            format!(
                "{}{:02}{}",
                WORKER_AUTH_PREFIX,
                ordinal,
                &payload[start..end]
            )
        })
        .collect();

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_prefixed_entry_is_not_applicable() {
        let protocols = ["h2", "http/1.1"];
        let err = parse_offer(&protocols).unwrap_err();
        assert!(err.is_not_applicable());

        let empty: [&str; 0] = [];
        assert!(parse_offer(&empty).unwrap_err().is_not_applicable());
    }

    #[test]
    fn test_single_fragment() {
        let protocols = ["h2", "v1workerauth-00abcDEF"];
        let offer = parse_offer(&protocols).unwrap();

        assert_eq!(offer.protocol, "v1workerauth-00abcDEF");
        assert_eq!(offer.payload, "abcDEF");
    }

    #[test]
    fn test_fragments_concatenate_in_ordinal_order() {
        let protocols = [
            "v1workerauth-00aaa",
            "h2",
            "v1workerauth-01bbb",
            "v1workerauth-02ccc",
        ];
        let offer = parse_offer(&protocols).unwrap();
        assert_eq!(offer.protocol, "v1workerauth-00aaa");
        assert_eq!(offer.payload, "aaabbbccc");
    }

    #[test]
    fn test_out_of_order_fragments_follow_ordinal() {
        let protocols = ["v1workerauth-02ccc", "v1workerauth-00aaa", "v1workerauth-01bbb"];
        let offer = parse_offer(&protocols).unwrap();

        // first encountered name is still the one echoed back
        assert_eq!(offer.protocol, "v1workerauth-02ccc");
        assert_eq!(offer.payload, "aaabbbccc");
    }

    #[test]
    fn test_ordinal_gap_is_malformed() {
        let protocols = ["v1workerauth-00aaa", "v1workerauth-02ccc"];
        assert!(matches!(
            parse_offer(&protocols),
            Err(AuthError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_duplicate_ordinal_is_malformed() {
        let protocols = ["v1workerauth-00aaa", "v1workerauth-00bbb"];
        assert!(matches!(
            parse_offer(&protocols),
            Err(AuthError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_missing_or_bad_ordinal_is_malformed() {
        for bad in ["v1workerauth-", "v1workerauth-0", "v1workerauth-x1abc", "v1workerauth-+1abc"] {
            assert!(
                matches!(parse_offer(&[bad]), Err(AuthError::MalformedPayload(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_multibyte_ordinal_does_not_panic() {
        let protocols = ["v1workerauth-é0abc", "v1workerauth-0é"];
        for name in protocols {
            assert!(matches!(
                parse_offer(&[name]),
                Err(AuthError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn test_encode_offer_respects_alpn_limit() {
        let payload = "A".repeat(MAX_FRAGMENT_LEN * 2 + 7);
        let names = encode_offer(&payload).unwrap();

        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.len() <= MAX_PROTOCOL_NAME_LEN));
        assert!(names[0].starts_with("v1workerauth-00"));
        assert!(names[2].starts_with("v1workerauth-02"));

        let offer = parse_offer(&names).unwrap();
        assert_eq!(offer.payload, payload);
        assert_eq!(offer.protocol, names[0]);
    }

    #[test]
    fn test_encode_offer_rejects_oversized_payload() {
        let payload = "A".repeat(MAX_FRAGMENT_LEN * MAX_FRAGMENTS + 1);
        assert!(matches!(
            encode_offer(&payload),
            Err(AuthError::OfferTooLarge { fragments: 101 })
        ));
    }
}
