use serde::Deserialize;

/// Frame sent by a chat client: `{"text": "...", "file_url": "..."}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub file_url: String,
}
