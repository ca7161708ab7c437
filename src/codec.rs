//! Value codec
//!
//! One process-wide serialization format shared by every store. Output is pretty-printed so
//! stored files stay readable and diffable when edited by hand.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Serialization format of every entry file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Yaml,
    Xml,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Json, Format::Yaml, Format::Xml];

    /// File extension used on disk, without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Xml => "xml",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.extension()
    }

    /// Encode a value into pretty-printed bytes.
    ///
    /// XML only supports struct-shaped values; maps and bare scalars fail here.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Format::Json => serde_json::to_vec_pretty(value).map_err(|e| self.codec_err(e)),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| self.codec_err(e)),
            Format::Xml => {
                let mut out = String::new();
                let mut serializer = quick_xml::se::Serializer::new(&mut out);
                serializer.indent(' ', 2);
                value.serialize(serializer).map_err(|e| self.codec_err(e))?;
                out.push('\n');
                Ok(out.into_bytes())
            }
        }
    }

    /// Decode bytes into a freshly allocated value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Format::Json => serde_json::from_slice(bytes).map_err(|e| self.codec_err(e)),
            Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| self.codec_err(e)),
            Format::Xml => {
                let text = std::str::from_utf8(bytes).map_err(|e| self.codec_err(e))?;
                quick_xml::de::from_str(text).map_err(|e| self.codec_err(e))
            }
        }
    }

    fn codec_err(&self, err: impl fmt::Display) -> StoreError {
        StoreError::Codec {
            format: self.as_str(),
            message: err.to_string(),
        }
    }
}

impl FromStr for Format {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "xml" => Ok(Format::Xml),
            other => Err(StoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
