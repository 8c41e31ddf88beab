use anyhow::{Result, bail};
use encoding_rs::{Encoding, UTF_8};

#[derive(Debug, Clone)]
pub struct DecodedTarget {
    pub text: String,
    pub had_bom: bool,
}

/// Decodes the target bundle. Only UTF-8 (with or without BOM) is accepted;
/// anything lossy would corrupt the file on write-back.
pub fn decode_target(bytes: &[u8]) -> Result<DecodedTarget> {
    let had_bom = match Encoding::for_bom(bytes) {
        Some((encoding, _)) if encoding == UTF_8 => true,
        Some((encoding, _)) => bail!("target is {}, expected UTF-8", encoding.name()),
        None => false,
    };
    let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
    if had_errors {
        bail!("target is not valid UTF-8");
    }
    Ok(DecodedTarget {
        text: text.into_owned(),
        had_bom,
    })
}

pub fn encode_target(text: &str, had_bom: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    if had_bom {
        out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    }
    out.extend_from_slice(text.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_utf8_round_trips() {
        let decoded = decode_target("var a=\"✢\";".as_bytes()).expect("decoded");
        assert!(!decoded.had_bom);
        assert_eq!(encode_target(&decoded.text, decoded.had_bom), "var a=\"✢\";".as_bytes());
    }

    #[test]
    fn bom_is_stripped_and_restored() {
        let bytes = [&[0xEF, 0xBB, 0xBF][..], b"var a=1;"].concat();
        let decoded = decode_target(&bytes).expect("decoded");
        assert!(decoded.had_bom);
        assert_eq!(decoded.text, "var a=1;");
        assert_eq!(encode_target(&decoded.text, true), bytes);
    }

    #[test]
    fn utf16_and_invalid_bytes_are_rejected() {
        assert!(decode_target(&[0xFF, 0xFE, b'a', 0]).is_err());
        assert!(decode_target(&[b'a', 0xC3, 0x28]).is_err());
    }
}
