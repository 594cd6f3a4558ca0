//
// Copyright 2019-2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Small helpers shared across the core.

use std::borrow::Cow;

/// Scrubs ICE passwords out of SDP text for public logging purposes.
/// Returns the input untouched when it carries no `ice-pwd` attribute.
pub fn redact_string(text: &str) -> Cow<'_, str> {
    if !text.contains("ice-pwd") {
        return Cow::Borrowed(text);
    }

    let redacted: Vec<&str> = text
        .lines()
        .map(|line| {
            if line.contains("ice-pwd") {
                "a=ice-pwd:[ REDACTED ]"
            } else {
                line
            }
        })
        .collect();
    Cow::Owned(redacted.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_ice_pwd() {
        let text = "abc\nice-pwd\ndef\n ice-pwd \nghi";
        assert_eq!(
            "abc\na=ice-pwd:[ REDACTED ]\ndef\na=ice-pwd:[ REDACTED ]\nghi",
            redact_string(text),
        );
    }

    #[test]
    fn check_no_ice_pwd() {
        let text = "v=0\nm=audio 9 UDP/TLS/RTP/SAVPF 111";
        assert!(matches!(redact_string(text), Cow::Borrowed(_)));
        assert_eq!(text, redact_string(text));
    }
}
