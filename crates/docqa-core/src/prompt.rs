//! Prompt templates with `{context}` and `{question}` placeholders.

use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_TEMPLATE: &str = "Context: {context}

Question: {question}

Answer the question using only the context above. If the context does not contain enough information, say so.";

const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Context,
    Question,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Slot(Slot),
}

/// A parsed template. Parsing happens once; rendering never re-scans the
/// substituted text, so braces inside the context or question are inert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pieces: Vec<Piece>,
}

impl PromptTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err(Error::Template("unclosed '{' in template".into())),
                        }
                    }
                    let slot = match name.as_str() {
                        "context" => Slot::Context,
                        "question" => Slot::Question,
                        other => return Err(Error::Template(format!("unknown placeholder '{{{other}}}'"))),
                    };
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Slot(slot));
                }
                '}' => return Err(Error::Template("single '}' in template; use '}}' for a literal brace".into())),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        if !pieces.contains(&Piece::Slot(Slot::Question)) {
            return Err(Error::Template("template must contain a {question} placeholder".into()));
        }
        Ok(Self { pieces })
    }

    /// Read the template at `path`, or the built-in default when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(source) => {
                tracing::debug!(path = %path.display(), "loaded prompt template");
                Self::parse(&source)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn has_context(&self) -> bool {
        self.pieces.contains(&Piece::Slot(Slot::Context))
    }

    pub fn render(&self, context: &str, question: &str) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => out.push_str(s),
                Piece::Slot(Slot::Context) => out.push_str(context),
                Piece::Slot(Slot::Question) => out.push_str(question),
            }
        }
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            pieces: vec![
                Piece::Literal("Context: ".into()),
                Piece::Slot(Slot::Context),
                Piece::Literal("\n\nQuestion: ".into()),
                Piece::Slot(Slot::Question),
                Piece::Literal(
                    "\n\nAnswer the question using only the context above. If the context does not contain enough information, say so."
                        .into(),
                ),
            ],
        }
    }
}

/// Join `fragments` with a blank line, in the given order, and fill the template.
pub fn assemble<S: AsRef<str>>(template: &PromptTemplate, fragments: &[S], question: &str) -> String {
    let context = fragments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    template.render(&context, question)
}
