use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

pub fn rfc3339_string(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

pub struct DomainNormalizer {
    host: Regex,
}

impl DomainNormalizer {
    pub fn new() -> Result<Self> {
        let host = Regex::new(r"^(?:[a-z][a-z0-9+.\-]*://)?(?:[^@/]*@)?(?:www\.)?([^/:?#\s]+)")
            .context("failed to compile citation host regex")?;
        Ok(Self { host })
    }

    pub fn normalize(&self, citation: &str) -> Option<String> {
        let lowered = citation.trim().to_ascii_lowercase();
        let host = self
            .host
            .captures(&lowered)?
            .get(1)?
            .as_str()
            .trim_end_matches('.');
        if host.is_empty() {
            return None;
        }
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_urls_and_bare_hosts() {
        let normalizer = DomainNormalizer::new().expect("regex should compile");
        let cases = [
            ("https://www.Example.com/path?q=1", Some("example.com")),
            ("http://docs.vendor.io:8080/a", Some("docs.vendor.io")),
            ("example.org", Some("example.org")),
            ("  WWW.news.co.uk/story ", Some("news.co.uk")),
            ("ftp://user@files.example.net/x", Some("files.example.net")),
            ("", None),
            ("/relative/path", None),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalizer.normalize(input).as_deref(),
                expected,
                "input {input:?}"
            );
        }
    }

    #[test]
    fn json_round_trip_through_files() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("nested").join("value.json");
        write_json_pretty(&path, &serde_json::json!({"a": 1})).expect("json should be written");
        let value: serde_json::Value = read_json(&path).expect("json should be read");
        assert_eq!(value["a"], 1);
        assert_eq!(sha256_file(&path).expect("hash").len(), 64);
    }
}
