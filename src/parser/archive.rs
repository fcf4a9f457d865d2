use super::ParseError;
use std::io::{Cursor, Read};

pub(super) struct ArchiveMember {
    pub(super) name: String,
    pub(super) bytes: Vec<u8>,
}

/// Read every `.pdf` member of a zip archive, in archive order.
///
/// Directories, non-PDF members, and resource-fork entries (`__MACOSX/`) are skipped. Each
/// member read is capped at `max_member_bytes`.
pub(super) fn pdf_members(
    bytes: &[u8],
    max_member_bytes: u64,
) -> Result<Vec<ArchiveMember>, ParseError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut members = Vec::new();

    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let name = file.name().to_string();
        if file.is_dir()
            || name.starts_with("__MACOSX/")
            || !name.to_ascii_lowercase().ends_with(".pdf")
        {
            tracing::trace!(member = %name, "Skipping non-PDF archive member");
            continue;
        }

        if file.size() > max_member_bytes {
            return Err(ParseError::MemberTooLarge {
                name,
                limit: max_member_bytes,
            });
        }

        let mut buffer = Vec::new();
        file.take(max_member_bytes + 1)
            .read_to_end(&mut buffer)
            .map_err(|source| ParseError::MemberRead {
                name: name.clone(),
                source,
            })?;
        if buffer.len() as u64 > max_member_bytes {
            return Err(ParseError::MemberTooLarge {
                name,
                limit: max_member_bytes,
            });
        }

        members.push(ArchiveMember {
            name,
            bytes: buffer,
        });
    }

    if members.is_empty() {
        return Err(ParseError::EmptyArchive);
    }
    Ok(members)
}
