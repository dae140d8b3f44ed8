use serde::{Deserialize, Serialize};

// Letter returned to the front end, also the JSON schema asked from the model
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MagicLetter {
    pub meaning_of_name: String,
    pub funny_joke: String,
    pub heartfelt_wish: String,
    pub personalized_story: String,
}

#[derive(Deserialize, Clone)]
pub struct LetterRequest {
    pub name: String,
    // selfie, raw base64 or a data URL
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct StickerRequest {
    pub name: String,
    pub image: String,
}

#[derive(Deserialize, Clone)]
pub struct BackgroundRequest {
    pub name: String,
}

// Generated image as a data URL, null when generation failed
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ImageResponse {
    pub image: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Greeting {
    pub letter: MagicLetter,
    pub sticker: Option<String>,
    pub background: Option<String>,
}
