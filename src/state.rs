use crate::gemini::GeminiClient;
use crate::key_pool::KeyPool;

// app's shared state
pub struct AppState {
    pub pool: KeyPool,
    pub client: GeminiClient,
    pub text_model: String, // model used for the letter
}
