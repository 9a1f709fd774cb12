/*!
 * Document translation collaborators for the job manager.
 *
 * - `document`: paragraph model for plain-text documents
 * - `operation`: the `TranslationOperation` translating those documents
 */

// Re-export main types for easier usage
pub use self::document::TextDocument;
pub use self::operation::{EchoTranslator, ParagraphRequest, ParagraphTranslator, TextDocumentOperation};

// Submodules
pub mod document;
pub mod operation;
