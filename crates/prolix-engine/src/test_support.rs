use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::providers::{
    MockProvider, PromptContext, PromptPurpose, ProviderClient, ProviderError,
    RegionDescription, RegionRequest, TextDraft,
};

pub fn words(n: usize) -> String {
    vec!["drift"; n].join(" ")
}

pub fn solid_png(rgb: [u8; 3]) -> anyhow::Result<Vec<u8>> {
    let img = RgbImage::from_pixel(10, 10, Rgb(rgb));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

type Scripted = Result<String, ProviderError>;

/// Replays queued answers, then falls back to `sticky` or the mock.
#[derive(Default)]
pub struct ScriptedProvider {
    concepts: Mutex<VecDeque<Scripted>>,
    paragraphs: Mutex<VecDeque<Scripted>>,
    sticky_paragraph: Option<Scripted>,
    paragraph_calls: AtomicU32,
    contexts: Mutex<Vec<PromptContext>>,
    mock: MockProvider,
}

impl ScriptedProvider {
    pub fn with_concepts(concepts: Vec<Scripted>) -> Self {
        Self {
            concepts: Mutex::new(concepts.into()),
            ..Self::default()
        }
    }

    pub fn with_paragraphs(paragraphs: Vec<Scripted>) -> Self {
        Self {
            paragraphs: Mutex::new(paragraphs.into()),
            ..Self::default()
        }
    }

    pub fn always(paragraph: Scripted) -> Self {
        Self {
            sticky_paragraph: Some(paragraph),
            ..Self::default()
        }
    }

    pub fn paragraph_calls(&self) -> u32 {
        self.paragraph_calls.load(Ordering::SeqCst)
    }

    pub fn paragraph_contexts(&self) -> Vec<PromptContext> {
        self.contexts
            .lock()
            .map(|contexts| contexts.clone())
            .unwrap_or_default()
    }
}

impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn describe_region(
        &self,
        request: &RegionRequest<'_>,
    ) -> Result<RegionDescription, ProviderError> {
        self.mock.describe_region(request)
    }

    fn continue_text(&self, context: &PromptContext) -> Result<TextDraft, ProviderError> {
        let queue = match context.purpose {
            PromptPurpose::NextConcept => &self.concepts,
            PromptPurpose::Paragraph => {
                self.paragraph_calls.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut contexts) = self.contexts.lock() {
                    contexts.push(context.clone());
                }
                &self.paragraphs
            }
        };
        let queued = queue.lock().ok().and_then(|mut queue| queue.pop_front());
        let scripted = match (queued, context.purpose) {
            (Some(next), _) => Some(next),
            (None, PromptPurpose::Paragraph) => self.sticky_paragraph.clone(),
            (None, PromptPurpose::NextConcept) => None,
        };
        match scripted {
            Some(answer) => answer.map(|text| TextDraft { text }),
            None => self.mock.continue_text(context),
        }
    }
}

/// Counts every call made through it.
pub struct CountingProvider {
    inner: Arc<dyn ProviderClient>,
    calls: AtomicU32,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn ProviderClient>) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderClient for CountingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn describe_region(
        &self,
        request: &RegionRequest<'_>,
    ) -> Result<RegionDescription, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.describe_region(request)
    }

    fn continue_text(&self, context: &PromptContext) -> Result<TextDraft, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.continue_text(context)
    }
}
