/*!
 * Plain-text document model.
 *
 * Text, markdown and subtitle files are handled as a sequence of paragraphs
 * separated by blank lines. Rendering writes either the translation alone or
 * each original paragraph followed by its translation.
 */

/// A document split into paragraphs
#[derive(Debug, Clone, PartialEq)]
pub struct TextDocument {
    paragraphs: Vec<String>,
}

impl TextDocument {
    /// Split content on blank lines, dropping empty paragraphs
    pub fn parse(content: &str) -> Self {
        let normalized = content.replace("\r\n", "\n");
        let mut paragraphs = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in normalized.lines() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    paragraphs.push(current.join("\n"));
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            paragraphs.push(current.join("\n"));
        }

        Self { paragraphs }
    }

    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// Render translated paragraphs.
    ///
    /// Paragraphs past the end of `translations` (test mode) are kept as-is.
    pub fn render(&self, translations: &[String], single_output: bool) -> String {
        let blocks: Vec<String> = self
            .paragraphs
            .iter()
            .enumerate()
            .map(|(i, original)| match translations.get(i) {
                Some(translated) if single_output => translated.clone(),
                Some(translated) => format!("{}\n\n{}", original, translated),
                None => original.clone(),
            })
            .collect();

        let mut output = blocks.join("\n\n");
        output.push('\n');
        output
    }
}
