use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{Author, Turn, IMAGE_PLACEHOLDER};

pub const DEFAULT_MAX_IMAGES: usize = 5;

/// A conversation entry as the model sees it: screenshots are reduced to
/// [`IMAGE_PLACEHOLDER`] and their payloads travel in [`ModelInput::images`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub author: Author,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    pub conversations: Vec<ModelTurn>,
    /// Base64 screenshots, in the order their placeholders appear.
    pub images: Vec<String>,
}

impl ModelInput {
    pub fn placeholder_count(&self) -> usize {
        self.conversations
            .iter()
            .filter(|t| t.value == IMAGE_PLACEHOLDER)
            .count()
    }
}

/// Builds the model input from the full history, keeping only the newest
/// `max_images` screenshots. Text turns are always kept.
pub fn to_model_input(conversation: &[Turn], max_images: usize) -> ModelInput {
    let mut input = ModelInput::default();
    for turn in conversation {
        match &turn.screenshot {
            Some(shot) => {
                input.conversations.push(ModelTurn {
                    author: turn.author,
                    value: IMAGE_PLACEHOLDER.to_string(),
                });
                input.images.push(shot.base64.clone());
            }
            None => input.conversations.push(ModelTurn {
                author: turn.author,
                value: turn.value.clone(),
            }),
        }
    }

    if input.images.len() > max_images {
        let excess = input.images.len() - max_images;
        input.images.drain(..excess);
        let mut dropped = 0;
        input.conversations.retain(|t| {
            if dropped < excess && t.value == IMAGE_PLACEHOLDER {
                dropped += 1;
                false
            } else {
                true
            }
        });
        tracing::debug!(dropped = excess, kept = input.images.len(), "older screenshots windowed out");
    }

    input
}
