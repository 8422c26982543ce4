// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! TURN REST credentials (the long-term-credential HMAC scheme used by
//! coturn): `username = "<expiryUnix>:<whisperId>"`, `credential =
//! base64(HMAC-SHA1(sharedSecret, username))`. Credentials are minted on
//! request and never stored.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::identifiers::WhisperId;
use crate::messages::client_call::TurnCredentials;
use crate::time::TimeStamp;

use super::encode_base64;

/// Default credential lifetime in seconds.
pub const TURN_CREDENTIAL_TTL_SECS: u32 = 3600;

pub fn mint_turn_credentials(
    shared_secret: &str,
    urls: &[String],
    whisper_id: &WhisperId,
    now: TimeStamp,
    ttl_secs: u32,
) -> TurnCredentials {
    let expiry_unix = now.as_millis() / 1000 + ttl_secs as i64;
    let username = format!("{expiry_unix}:{whisper_id}");

    let mut mac = Hmac::<Sha1>::new_from_slice(shared_secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(username.as_bytes());
    let credential = encode_base64(&mac.finalize().into_bytes());

    TurnCredentials {
        urls: urls.to_vec(),
        username,
        credential,
        ttl: ttl_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_deterministic_for_fixed_time() {
        let id = WhisperId::derive_from_key(&[3u8; 32]);
        let now = TimeStamp::from_millis(1_700_000_000_000).unwrap();
        let urls = vec!["turn:turn.example.com:3478".to_owned()];

        let a = mint_turn_credentials("secret", &urls, &id, now, TURN_CREDENTIAL_TTL_SECS);
        let b = mint_turn_credentials("secret", &urls, &id, now, TURN_CREDENTIAL_TTL_SECS);
        assert_eq!(a, b);
        assert_eq!(a.ttl, 3600);
        assert_eq!(a.username, format!("1700003600:{id}"));
        assert_eq!(a.urls, urls);
    }

    #[test]
    fn different_secrets_yield_different_credentials() {
        let id = WhisperId::derive_from_key(&[3u8; 32]);
        let now = TimeStamp::from_millis(1_700_000_000_000).unwrap();

        let a = mint_turn_credentials("alpha", &[], &id, now, 3600);
        let b = mint_turn_credentials("beta", &[], &id, now, 3600);
        assert_ne!(a.credential, b.credential);
    }
}
