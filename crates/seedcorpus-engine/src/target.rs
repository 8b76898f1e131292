//! Wrapped target libraries and their API surfaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors resolving a target library.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("unknown target library: {0}")]
    UnknownTarget(String),
}

/// A wrapped third-party library that seeds exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetLibrary {
    #[serde(rename = "cJSON")]
    CJson,
    #[serde(rename = "lcms2")]
    Lcms2,
    #[serde(rename = "libpcap")]
    Libpcap,
    #[serde(rename = "libpng")]
    Libpng,
    #[serde(rename = "re2")]
    Re2,
    #[serde(rename = "sqlite3")]
    Sqlite3,
    #[serde(rename = "zlib")]
    Zlib,
}

/// zlib exports no common prefix, so its surface is listed by name stem.
const ZLIB_STEMS: &[&str] = &[
    "deflate",
    "inflate",
    "compress",
    "uncompress",
    "gz",
    "crc32",
    "adler32",
    "zlibVersion",
    "zlibCompileFlags",
    "zError",
    "get_crc_table",
];

impl TargetLibrary {
    /// Every supported library, in canonical order.
    pub const ALL: [TargetLibrary; 7] = [
        TargetLibrary::CJson,
        TargetLibrary::Lcms2,
        TargetLibrary::Libpcap,
        TargetLibrary::Libpng,
        TargetLibrary::Re2,
        TargetLibrary::Sqlite3,
        TargetLibrary::Zlib,
    ];

    /// Canonical name, as used in seed headers and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            TargetLibrary::CJson => "cJSON",
            TargetLibrary::Lcms2 => "lcms2",
            TargetLibrary::Libpcap => "libpcap",
            TargetLibrary::Libpng => "libpng",
            TargetLibrary::Re2 => "re2",
            TargetLibrary::Sqlite3 => "sqlite3",
            TargetLibrary::Zlib => "zlib",
        }
    }

    /// Whether `call` belongs to this library's public API.
    ///
    /// Generated harnesses sometimes pull in headers of other libraries;
    /// calls into those are not part of the target's surface.
    pub fn is_library_api(self, call: &str) -> bool {
        let call = call.trim();
        match self {
            TargetLibrary::CJson => call.starts_with("cJSON_"),
            TargetLibrary::Lcms2 => call.starts_with("cms") || call.starts_with("_cms"),
            TargetLibrary::Libpcap => call.starts_with("pcap_"),
            TargetLibrary::Libpng => call.starts_with("png_"),
            TargetLibrary::Re2 => {
                call.starts_with("cre2_") || call.starts_with("RE2::") || call.starts_with("re2::")
            }
            TargetLibrary::Sqlite3 => call.starts_with("sqlite3_"),
            TargetLibrary::Zlib => ZLIB_STEMS.iter().any(|stem| call.starts_with(stem)),
        }
    }
}

impl fmt::Display for TargetLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetLibrary {
    type Err = TargetError;

    /// Accepts canonical names and the project names used by the generator
    /// (`lcms`, `cre2`, `sqlite`, ...), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cjson" => Ok(TargetLibrary::CJson),
            "lcms2" | "lcms" => Ok(TargetLibrary::Lcms2),
            "libpcap" | "pcap" => Ok(TargetLibrary::Libpcap),
            "libpng" | "png" => Ok(TargetLibrary::Libpng),
            "re2" | "cre2" => Ok(TargetLibrary::Re2),
            "sqlite3" | "sqlite" => Ok(TargetLibrary::Sqlite3),
            "zlib" => Ok(TargetLibrary::Zlib),
            _ => Err(TargetError::UnknownTarget(s.to_string())),
        }
    }
}
