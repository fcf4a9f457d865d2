use crate::completion::ChatMessage;
use crate::index::SearchHit;
use std::fmt::Write as _;

/// Grounding instructions plus numbered passages for one question.
pub(crate) fn grounding_message(file_name: &str, hits: &[SearchHit<'_>]) -> ChatMessage {
    let mut prompt = format!(
        "You are a helpful assistant. The user is asking questions related to a document: \
         \"{file_name}\". Answer using the context below. If the context does not contain the \
         answer, say that you do not know. When you answer, include relevant page numbers.\n\n\
         Context:\n"
    );

    if hits.is_empty() {
        prompt.push_str("(no matching passages)\n");
    }
    for (position, hit) in hits.iter().enumerate() {
        let entry = hit.entry;
        let _ = if entry.source == file_name {
            writeln!(prompt, "[{}] [Page {}] {}", position + 1, entry.page, entry.text)
        } else {
            writeln!(
                prompt,
                "[{}] [Page {}, {}] {}",
                position + 1,
                entry.page,
                entry.source,
                entry.text
            )
        };
    }

    ChatMessage::system(prompt.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChatRole;
    use crate::parser::{TextUnit, UnitOrigin};

    fn unit(text: &str, page: u32, source: &str) -> TextUnit {
        TextUnit {
            text: text.into(),
            page,
            source: source.into(),
            origin: UnitOrigin::Text,
        }
    }

    #[test]
    fn passages_are_numbered_and_labelled_with_pages() {
        let revenue = unit("Revenue was $5M in 2023", 2, "report.pdf");
        let member = unit("Appendix table", 4, "scans/b.pdf");
        let hits = [
            SearchHit {
                score: 0.9,
                entry: &revenue,
            },
            SearchHit {
                score: 0.4,
                entry: &member,
            },
        ];

        let message = grounding_message("report.pdf", &hits);

        assert_eq!(message.role, ChatRole::System);
        assert!(message.content.contains("related to a document: \"report.pdf\""));
        assert!(message.content.contains("include relevant page numbers"));
        assert!(message.content.contains("[1] [Page 2] Revenue was $5M in 2023"));
        assert!(message.content.contains("[2] [Page 4, scans/b.pdf] Appendix table"));
    }

    #[test]
    fn empty_retrieval_is_stated() {
        let message = grounding_message("report.pdf", &[]);
        assert!(message.content.ends_with("(no matching passages)"));
    }
}
