//! Signing certificate extraction from APK archives.
//!
//! The APK Signature Scheme v3/v2 block sitting in front of the ZIP central
//! directory is consulted first. Archives signed only with the legacy JAR
//! scheme fall back to the PKCS#7 blob under `META-INF/`.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];
const EOCD_LEN: usize = 22;
const MAX_EOCD_SEARCH: u64 = 22 + 65_535;
const SIG_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";
const SIG_BLOCK_FOOTER_LEN: u64 = 24;
const V2_BLOCK_ID: u32 = 0x7109_871a;
const V3_BLOCK_ID: u32 = 0xf053_68c0;
// 1.2.840.113549.1.7.2
const SIGNED_DATA_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];

const DER_SEQUENCE: u8 = 0x30;
const DER_OID: u8 = 0x06;
const DER_CONTEXT_0: u8 = 0xa0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
    #[error("unreadable archive: {0}")]
    Archive(String),
    #[error("archive carries no signing certificate")]
    Unsigned,
    #[error("malformed signature data: {0}")]
    Malformed(&'static str),
}

impl From<std::io::Error> for CertificateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for CertificateError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Read the DER encoded signing certificate of the APK at `path`.
///
/// # Errors
/// Returns an error when the file cannot be read, is not a ZIP archive, or
/// carries no recognisable signature.
pub fn read_signing_certificate(path: &Path) -> Result<Vec<u8>, CertificateError> {
    let file = std::fs::File::open(path)?;
    signing_certificate(std::io::BufReader::new(file))
}

/// Same as [`read_signing_certificate`] over any seekable reader.
///
/// # Errors
/// See [`read_signing_certificate`].
pub fn signing_certificate<R: Read + Seek>(mut reader: R) -> Result<Vec<u8>, CertificateError> {
    if let Some(certificate) = certificate_from_signing_block(&mut reader)? {
        return Ok(certificate);
    }
    reader.seek(SeekFrom::Start(0))?;
    certificate_from_jar_signature(reader)
}

fn certificate_from_signing_block<R: Read + Seek>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, CertificateError> {
    let Some(cd_offset) = central_directory_offset(reader)? else {
        return Ok(None);
    };
    if cd_offset < SIG_BLOCK_FOOTER_LEN + 8 {
        return Ok(None);
    }

    reader.seek(SeekFrom::Start(cd_offset - SIG_BLOCK_FOOTER_LEN))?;
    let mut footer = [0_u8; 24];
    reader.read_exact(&mut footer)?;
    if &footer[8..] != SIG_BLOCK_MAGIC {
        return Ok(None);
    }

    let block_size = ByteCursor::new(&footer).u64()?;
    if block_size < SIG_BLOCK_FOOTER_LEN
        || block_size.checked_add(8).is_none_or(|total| total > cd_offset)
    {
        return Err(CertificateError::Malformed("signing block size out of range"));
    }

    let pairs_len = usize::try_from(block_size - SIG_BLOCK_FOOTER_LEN)
        .map_err(|_| CertificateError::Malformed("signing block too large"))?;
    let block_start = cd_offset - block_size - 8;
    reader.seek(SeekFrom::Start(block_start))?;
    let mut leading_size = [0_u8; 8];
    reader.read_exact(&mut leading_size)?;
    if ByteCursor::new(&leading_size).u64()? != block_size {
        return Err(CertificateError::Malformed("signing block sizes disagree"));
    }

    let mut pairs = vec![0_u8; pairs_len];
    reader.read_exact(&mut pairs)?;

    let mut v2 = None;
    let mut v3 = None;
    let mut cursor = ByteCursor::new(&pairs);
    while !cursor.is_empty() {
        let pair_len = usize::try_from(cursor.u64()?)
            .map_err(|_| CertificateError::Malformed("signing block entry too large"))?;
        let mut pair = ByteCursor::new(cursor.take(pair_len)?);
        let id = pair.u32()?;
        match id {
            V2_BLOCK_ID => v2 = Some(pair.rest()),
            V3_BLOCK_ID => v3 = Some(pair.rest()),
            _ => {}
        }
    }

    v3.or(v2).map(first_scheme_certificate).transpose()
}

fn first_scheme_certificate(block_value: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let mut signers = ByteCursor::new(block_value).length_prefixed()?;
    let mut signer = signers.length_prefixed()?;
    let mut signed_data = signer.length_prefixed()?;
    signed_data.length_prefixed()?;
    let mut certificates = signed_data.length_prefixed()?;
    let certificate = certificates.length_prefixed()?.rest();
    if certificate.is_empty() {
        return Err(CertificateError::Malformed("empty certificate in signing block"));
    }
    Ok(certificate.to_vec())
}

fn central_directory_offset<R: Read + Seek>(reader: &mut R) -> Result<Option<u64>, CertificateError> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_LEN as u64 {
        return Ok(None);
    }

    let tail_len = file_len.min(MAX_EOCD_SEARCH);
    reader.seek(SeekFrom::Start(file_len - tail_len))?;
    let mut tail = vec![0_u8; usize::try_from(tail_len).unwrap_or(EOCD_LEN)];
    reader.read_exact(&mut tail)?;

    for start in (0..=tail.len() - EOCD_LEN).rev() {
        if tail[start..start + 4] != EOCD_SIGNATURE {
            continue;
        }
        let mut eocd = ByteCursor::new(&tail[start + 16..]);
        let cd_offset = eocd.u32()?;
        let comment_len = usize::from(eocd.u16()?);
        if start + EOCD_LEN + comment_len != tail.len() {
            continue;
        }
        if cd_offset == u32::MAX {
            // ZIP64 archives are not produced by Android build tooling.
            return Ok(None);
        }
        return Ok(Some(u64::from(cd_offset)));
    }

    Ok(None)
}

fn certificate_from_jar_signature<R: Read + Seek>(reader: R) -> Result<Vec<u8>, CertificateError> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut candidates: Vec<String> = archive
        .file_names()
        .filter(|name| is_signature_block_file(name))
        .map(str::to_string)
        .collect();
    candidates.sort();

    let Some(name) = candidates.first() else {
        return Err(CertificateError::Unsigned);
    };

    let mut entry = archive.by_name(name)?;
    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    pkcs7_first_certificate(&data)
}

fn is_signature_block_file(name: &str) -> bool {
    let Some(file) = name.strip_prefix("META-INF/") else {
        return false;
    };
    if file.contains('/') {
        return false;
    }
    let upper = file.to_ascii_uppercase();
    [".RSA", ".DSA", ".EC"]
        .iter()
        .any(|extension| upper.ends_with(extension))
}

fn pkcs7_first_certificate(data: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let (content_info, _) = read_tlv(data)?;
    if content_info.tag != DER_SEQUENCE {
        return Err(CertificateError::Malformed("PKCS#7 content info is not a sequence"));
    }

    let (oid, rest) = read_tlv(content_info.content)?;
    if oid.tag != DER_OID || oid.content != SIGNED_DATA_OID {
        return Err(CertificateError::Malformed("not a PKCS#7 signedData structure"));
    }

    let (explicit, _) = read_tlv(rest)?;
    let (signed_data, _) = read_tlv(explicit.content)?;
    if explicit.tag != DER_CONTEXT_0 || signed_data.tag != DER_SEQUENCE {
        return Err(CertificateError::Malformed("PKCS#7 signedData is malformed"));
    }

    let mut fields = signed_data.content;
    while !fields.is_empty() {
        let (field, rest) = read_tlv(fields)?;
        if field.tag == DER_CONTEXT_0 {
            let (certificate, _) = read_tlv(field.content)?;
            return Ok(certificate.raw.to_vec());
        }
        fields = rest;
    }

    Err(CertificateError::Malformed("signedData carries no certificates"))
}

struct Tlv<'a> {
    tag: u8,
    content: &'a [u8],
    raw: &'a [u8],
}

fn read_tlv(input: &[u8]) -> Result<(Tlv<'_>, &[u8]), CertificateError> {
    let [tag, first_len, rest @ ..] = input else {
        return Err(CertificateError::Malformed("truncated DER element"));
    };

    let (len, header_len) = if first_len & 0x80 == 0 {
        (usize::from(*first_len), 2)
    } else {
        let count = usize::from(first_len & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return Err(CertificateError::Malformed("unsupported DER length encoding"));
        }
        let len = rest[..count]
            .iter()
            .fold(0_usize, |acc, byte| (acc << 8) | usize::from(*byte));
        (len, 2 + count)
    };

    let end = header_len
        .checked_add(len)
        .filter(|end| *end <= input.len())
        .ok_or(CertificateError::Malformed("DER element exceeds input"))?;

    Ok((
        Tlv {
            tag: *tag,
            content: &input[header_len..end],
            raw: &input[..end],
        },
        &input[end..],
    ))
}

struct ByteCursor<'a> {
    data: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn rest(self) -> &'a [u8] {
        self.data
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CertificateError> {
        if self.data.len() < len {
            return Err(CertificateError::Malformed("truncated signing block"));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16, CertificateError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, CertificateError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, CertificateError> {
        let bytes = self.take(8)?;
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn length_prefixed(&mut self) -> Result<ByteCursor<'a>, CertificateError> {
        let len = usize::try_from(self.u32()?)
            .map_err(|_| CertificateError::Malformed("length prefix too large"))?;
        Ok(ByteCursor::new(self.take(len)?))
    }
}
