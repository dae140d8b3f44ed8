use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::UpstreamError;
use crate::gemini::{GeminiClient, first_inline_image, first_text};
use crate::metrics::FALLBACK_LETTERS;
use crate::models::{Greeting, MagicLetter};
use crate::state::AppState;

// Image model with its output settings
pub struct ImageModel {
    pub name: &'static str,
    pub image_size: Option<&'static str>,
}

impl ImageModel {
    fn image_config(&self) -> Value {
        match self.image_size {
            Some(size) => json!({"aspectRatio": "9:16", "imageSize": size}),
            None => json!({"aspectRatio": "9:16"}),
        }
    }
}

// Tried in order with the same key
pub const IMAGE_MODELS: &[ImageModel] = &[
    ImageModel {
        name: "gemini-2.5-flash-image",
        image_size: None,
    },
    ImageModel {
        name: "gemini-3-pro-image-preview",
        image_size: Some("1K"),
    },
];

// "data:image/jpeg;base64,XXXX" -> "XXXX", raw base64 passes through
pub fn strip_data_url(image: &str) -> &str {
    image.split_once(',').map_or(image, |(_, data)| data)
}

fn selfie_part(image: &str) -> Value {
    json!({"inlineData": {"mimeType": "image/jpeg", "data": strip_data_url(image)}})
}

fn letter_prompt(name: &str, with_photo: bool) -> String {
    let photo = if with_photo {
        "Look at the attached photo and tease their face and expression in a friendly way.\n"
    } else {
        ""
    };
    format!(
        "You are a top-tier Gen Z elf from the North Pole who lives for good vibes and good stories.\n\
         The user's name is '{name}'.\n\
         {photo}\
         Write a magic letter of about 150-200 words that is:\n\
         1. Funny, full of current slang.\n\
         2. Creative, with a completely made-up, magical meaning of their name.\n\
         3. Heartfelt, ending in a sincere but cool Christmas wish.\n\
         4. A story: a short tale of how Santa almost lost their present and you, the best elf, saved it.\n\
         Return only JSON matching the schema."
    )
}

fn letter_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "meaning_of_name": {"type": "STRING"},
            "funny_joke": {"type": "STRING"},
            "heartfelt_wish": {"type": "STRING"},
            "personalized_story": {"type": "STRING"}
        },
        "required": ["meaning_of_name", "funny_joke", "heartfelt_wish", "personalized_story"]
    })
}

// Served whenever generation is unavailable
pub fn fallback_letter(name: &str) -> MagicLetter {
    MagicLetter {
        meaning_of_name: format!("{name}, which in old elvish means 'the vibe that never sleeps'."),
        funny_joke: "This photo is peak main character energy. You look like you just found out \
                     Santa's sleigh has no 5G."
            .to_string(),
        heartfelt_wish: "Have an absolutely legendary Christmas, full of glitter and zero stress!"
            .to_string(),
        personalized_story: "Santa nearly mixed up your parcel with one meant for a penguin in \
                             Antarctica, but I drifted the sleigh around, stamped it 'VIP - Do Not \
                             Open' and got it back on track. You're officially the coolest one on \
                             the list this year!"
            .to_string(),
    }
}

/// Writes the letter for `name`, roasting the selfie when one is given.
/// Falls back to a pre-written letter on any failure.
pub async fn generate_magic_letter(state: &AppState, name: &str, image: Option<&str>) -> MagicLetter {
    let mut parts = vec![json!({"text": letter_prompt(name, image.is_some())})];
    if let Some(image) = image {
        parts.push(selfie_part(image));
    }
    let body = json!({
        "contents": [{"parts": parts}],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": letter_schema()
        }
    });

    let client = &state.client;
    let model = state.text_model.as_str();
    let body = &body;
    let result = state
        .pool
        .execute(move |key| async move { client.generate_content(&key, model, body).await })
        .await;

    let letter = match result {
        Ok(response) => first_text(&response)
            .ok_or_else(|| "response carried no text".to_string())
            .and_then(|text| serde_json::from_str::<MagicLetter>(&text).map_err(|e| e.to_string())),
        Err(e) => Err(e.to_string()),
    };

    letter.unwrap_or_else(|reason| {
        warn!(error = %reason, "Letter generation failed, serving fallback");
        FALLBACK_LETTERS.inc();
        fallback_letter(name)
    })
}

async fn try_image_models(
    client: &GeminiClient,
    key: &str,
    parts: &Value,
) -> Result<Value, UpstreamError> {
    let mut last_error = None;

    for model in IMAGE_MODELS {
        let body = json!({
            "contents": [{"parts": parts}],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": model.image_config()
            }
        });
        match client.generate_content(key, model.name, &body).await {
            Ok(response) => {
                info!(model = model.name, "Image model succeeded");
                return Ok(response);
            }
            Err(e) => {
                warn!(model = model.name, error = %e, "Image model failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| UpstreamError::new(None, "All image generation models failed")))
}

// Dispatches one image generation and pulls the picture out of the response
async fn generate_image(state: &AppState, what: &'static str, parts: Value) -> Option<String> {
    let client = &state.client;
    let parts = &parts;
    let result = state
        .pool
        .execute(move |key| async move { try_image_models(client, &key, parts).await })
        .await;

    match result {
        Ok(response) => {
            let image = first_inline_image(&response);
            if image.is_none() {
                warn!(what, "No inline image in response");
            }
            image
        }
        Err(e) => {
            warn!(what, error = %e, "Image generation failed");
            None
        }
    }
}

pub async fn generate_elf_sticker(state: &AppState, name: &str, image: &str) -> Option<String> {
    let prompt = format!(
        "Transform the person in this photo into a cute 3D Pixar-style Christmas Elf character \
         named {name}. Keep their facial features recognizable. They should be wearing a cool \
         red/green outfit and a pointy hat with a bell. The background should be transparent or \
         soft white blur. Portrait format."
    );
    let parts = json!([selfie_part(image), {"text": prompt}]);
    generate_image(state, "sticker", parts).await
}

pub async fn generate_background(state: &AppState, name: &str) -> Option<String> {
    let prompt = format!(
        "A cinematic 9:16 background of a magical Christmas workshop. Bokeh golden lights, snow \
         falling outside, huge decorated tree, cozy atmosphere, Pixar/Disney style animation \
         background for {name}."
    );
    generate_image(state, "background", json!([{"text": prompt}])).await
}

// The three calls run concurrently against the same key pool
pub async fn generate_greeting(state: &AppState, name: &str, image: Option<&str>) -> Greeting {
    let sticker = async {
        match image {
            Some(image) => generate_elf_sticker(state, name, image).await,
            None => None,
        }
    };
    let (letter, sticker, background) = tokio::join!(
        generate_magic_letter(state, name, image),
        sticker,
        generate_background(state, name)
    );
    Greeting {
        letter,
        sticker,
        background,
    }
}
