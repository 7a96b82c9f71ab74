//! Answer synthesis: fill the prompt template and call the language model.
//!
//! The prompt is a text resource with two placeholders, `{context}` and
//! `{input}`. The default template ships in `prompts/answer.txt` and can be
//! replaced at runtime with [`PromptTemplate::from_file`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SynthesisError;
use crate::models::{AnswerResult, RetrievedChunk};

const DEFAULT_TEMPLATE: &str = include_str!("../prompts/answer.txt");

const CONTEXT: &str = "{context}";
const INPUT: &str = "{input}";

/// A black-box prompt → text function.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, SynthesisError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Input,
}

/// Parsed prompt template.
///
/// Substitution happens in a single pass, so placeholder text appearing
/// inside the notes or the question is never expanded again.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template. Both `{context}` and `{input}` must appear.
    pub fn parse(source: &str) -> Result<Self, SynthesisError> {
        if !source.contains(CONTEXT) {
            return Err(SynthesisError::Template(format!(
                "template is missing the {} placeholder",
                CONTEXT
            )));
        }
        if !source.contains(INPUT) {
            return Err(SynthesisError::Template(format!(
                "template is missing the {} placeholder",
                INPUT
            )));
        }

        let mut segments = Vec::new();
        let mut rest = source;
        loop {
            let next = [(CONTEXT, Segment::Context), (INPUT, Segment::Input)]
                .into_iter()
                .filter_map(|(tag, seg)| rest.find(tag).map(|pos| (pos, tag, seg)))
                .min_by_key(|(pos, _, _)| *pos);
            match next {
                Some((pos, tag, seg)) => {
                    if pos > 0 {
                        segments.push(Segment::Literal(rest[..pos].to_string()));
                    }
                    segments.push(seg);
                    rest = &rest[pos + tag.len()..];
                }
                None => {
                    if !rest.is_empty() {
                        segments.push(Segment::Literal(rest.to_string()));
                    }
                    break;
                }
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Load a template from a text file.
    pub fn from_file(path: &Path) -> Result<Self, SynthesisError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            SynthesisError::Template(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&source)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Substitute `context` and `question` into the template.
    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::with_capacity(self.source.len() + context.len() + question.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Context => out.push_str(context),
                Segment::Input => out.push_str(question),
            }
        }
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        // The bundled template always carries both placeholders.
        Self::parse(DEFAULT_TEMPLATE).unwrap_or_else(|_| Self {
            source: DEFAULT_TEMPLATE.to_string(),
            segments: vec![Segment::Literal(DEFAULT_TEMPLATE.to_string())],
        })
    }
}

/// Chunk texts in retrieval order, separated by a blank line.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk_text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Combines a [`PromptTemplate`] with a [`Generator`].
pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, template: PromptTemplate) -> Self {
        Self {
            generator,
            template,
        }
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Produce an answer grounded on `context`.
    ///
    /// The generator is called even when `context` is empty; the template
    /// instructs the model to admit it does not know.
    pub async fn synthesize(
        &self,
        question: &str,
        context: Vec<RetrievedChunk>,
    ) -> Result<AnswerResult, SynthesisError> {
        let prompt = self.template.render(&format_context(&context), question);
        debug!(
            model = self.generator.model_name(),
            chunks = context.len(),
            prompt_chars = prompt.len(),
            "calling language model"
        );

        let answer = self.generator.generate(&prompt).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }

        Ok(AnswerResult {
            answer: answer.to_string(),
            source_chunks: context,
        })
    }
}
