//! Registry wire types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Source kind of a redirect entry
pub const REDIRECT_SOURCE: &str = "Redirect";

/// An entry as listed by the registry
///
/// Only the display name is interpreted; everything else is kept opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub video_and_stream: VideoAndStream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAndStream {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RegistryEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            video_and_stream: VideoAndStream {
                name: name.into(),
                extra: Map::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.video_and_stream.name
    }
}

/// Body of a stream insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStream {
    pub name: String,
    pub source: String,
    pub stream_information: StreamInformation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInformation {
    pub endpoints: Vec<String>,
    pub configuration: StreamConfiguration,
    pub extended_configuration: ExtendedConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedConfiguration {
    pub thermal: bool,
    pub disable_mavlink: bool,
}

impl NewStream {
    /// Redirect entry pointing clients at `url`
    pub fn redirect(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: REDIRECT_SOURCE.to_string(),
            stream_information: StreamInformation {
                endpoints: vec![url.into()],
                configuration: StreamConfiguration {
                    kind: "redirect".to_string(),
                },
                extended_configuration: ExtendedConfiguration {
                    thermal: false,
                    disable_mavlink: true,
                },
            },
        }
    }
}
