//! Translation between host and fragment coordinate spaces
//!
//! A fragment's local coordinates are offsets and line/column positions into
//! its own content; host coordinates are the same inside the host document.
//! Offsets are in bytes, columns are counted in chars and `\n` is the only
//! line break.
//!
//! Only the fragment content is walked here. Host offset <-> position
//! conversion goes through [`TextCoordinates`], which the host text model
//! implements on top of its rope.

use tower_lsp::lsp_types::{
    CompletionItem, CompletionResponse, CompletionTextEdit, InsertReplaceEdit, Position, Range,
    TextEdit,
};

use super::scanner::Fragment;

/// Offset <-> position conversion over some text
pub trait TextCoordinates {
    /// Position of a byte offset; offsets past the end map to the end
    fn position_at(&self, offset: usize) -> Position;
    /// Byte offset of a position, clamped to the line and to the text
    fn offset_at(&self, position: Position) -> usize;
}

impl TextCoordinates for str {
    fn position_at(&self, offset: usize) -> Position {
        local_position(self, offset)
    }

    fn offset_at(&self, position: Position) -> usize {
        local_offset(self, position)
    }
}

/// Byte offset of `position` inside `content`
///
/// A column past the end of its line clamps to the end of that line; a line
/// past the last one clamps to the end of the content.
pub fn local_offset(content: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match content[line_start..].find('\n') {
            Some(newline) => line_start += newline + 1,
            None => return content.len(),
        }
    }

    let line = &content[line_start..];
    let line = &line[..line.find('\n').unwrap_or(line.len())];
    let column = line
        .char_indices()
        .nth(position.character as usize)
        .map_or(line.len(), |(byte, _)| byte);
    line_start + column
}

/// Line/column position of a byte offset inside `content`
///
/// Offsets past the end clamp to the end; offsets inside a multi-byte char
/// resolve to that char.
pub fn local_position(content: &str, offset: usize) -> Position {
    let mut offset = offset.min(content.len());
    while !content.is_char_boundary(offset) {
        offset -= 1;
    }

    let before = &content[..offset];
    let line = before.matches('\n').count();
    let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
    Position {
        line: line as u32,
        character: before[line_start..].chars().count() as u32,
    }
}

/// Host position of a position local to `fragment`
pub fn to_host_position<H>(fragment: &Fragment, local: Position, host: &H) -> Position
where
    H: TextCoordinates + ?Sized,
{
    host.position_at(fragment.start + local_offset(&fragment.content, local))
}

/// Local position of a host position, or `None` outside `[start, end]`
pub fn to_local_position<H>(fragment: &Fragment, host_position: Position, host: &H) -> Option<Position>
where
    H: TextCoordinates + ?Sized,
{
    let offset = host.offset_at(host_position);
    if !fragment.contains_offset(offset) {
        return None;
    }
    Some(local_position(&fragment.content, offset - fragment.start))
}

/// Translates a local range into host coordinates
///
/// Single-line ranges keep their width: only the start is walked and the
/// end is placed the same number of columns after it.
pub fn to_host_range<H>(fragment: &Fragment, range: Range, host: &H) -> Range
where
    H: TextCoordinates + ?Sized,
{
    let start = to_host_position(fragment, range.start, host);
    let end = if range.start.line == range.end.line {
        shift_columns(start, range)
    } else {
        to_host_position(fragment, range.end, host)
    };
    Range { start, end }
}

/// Translates a host range into local coordinates, mirroring [`to_host_range`]
pub fn to_local_range<H>(fragment: &Fragment, range: Range, host: &H) -> Option<Range>
where
    H: TextCoordinates + ?Sized,
{
    let start = to_local_position(fragment, range.start, host)?;
    let end = if range.start.line == range.end.line {
        shift_columns(start, range)
    } else {
        to_local_position(fragment, range.end, host)?
    };
    Some(Range { start, end })
}

fn shift_columns(start: Position, range: Range) -> Position {
    Position {
        line: start.line,
        character: start
            .character
            .saturating_add(range.end.character.saturating_sub(range.start.character)),
    }
}

/// The span(s) a completion edit applies to
///
/// Backends answer with either a plain text edit or an insert/replace pair;
/// both shapes are translated range by range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditSpan {
    Single(Range),
    InsertReplace { insert: Range, replace: Range },
}

impl EditSpan {
    pub fn of(edit: &CompletionTextEdit) -> Self {
        match edit {
            CompletionTextEdit::Edit(edit) => EditSpan::Single(edit.range),
            CompletionTextEdit::InsertAndReplace(edit) => EditSpan::InsertReplace {
                insert: edit.insert,
                replace: edit.replace,
            },
        }
    }

    pub fn map(self, mut f: impl FnMut(Range) -> Range) -> Self {
        match self {
            EditSpan::Single(range) => EditSpan::Single(f(range)),
            EditSpan::InsertReplace { insert, replace } => EditSpan::InsertReplace {
                insert: f(insert),
                replace: f(replace),
            },
        }
    }

    pub fn into_edit(self, new_text: String) -> CompletionTextEdit {
        match self {
            EditSpan::Single(range) => CompletionTextEdit::Edit(TextEdit { range, new_text }),
            EditSpan::InsertReplace { insert, replace } => {
                CompletionTextEdit::InsertAndReplace(InsertReplaceEdit {
                    new_text,
                    insert,
                    replace,
                })
            }
        }
    }
}

fn edit_text(edit: CompletionTextEdit) -> String {
    match edit {
        CompletionTextEdit::Edit(edit) => edit.new_text,
        CompletionTextEdit::InsertAndReplace(edit) => edit.new_text,
    }
}

/// Translates a completion result computed on the fragment into host coordinates
///
/// Every item's primary edit and its additional text edits are moved;
/// everything else passes through untouched.
pub fn to_host_completion<H>(fragment: &Fragment, response: CompletionResponse, host: &H) -> CompletionResponse
where
    H: TextCoordinates + ?Sized,
{
    let translate = |items: &mut Vec<CompletionItem>| {
        for item in items.iter_mut() {
            translate_item(fragment, item, host);
        }
    };
    match response {
        CompletionResponse::Array(mut items) => {
            translate(&mut items);
            CompletionResponse::Array(items)
        }
        CompletionResponse::List(mut list) => {
            translate(&mut list.items);
            CompletionResponse::List(list)
        }
    }
}

fn translate_item<H>(fragment: &Fragment, item: &mut CompletionItem, host: &H)
where
    H: TextCoordinates + ?Sized,
{
    if let Some(edit) = item.text_edit.take() {
        let span = EditSpan::of(&edit).map(|range| to_host_range(fragment, range, host));
        item.text_edit = Some(span.into_edit(edit_text(edit)));
    }
    if let Some(edits) = item.additional_text_edits.as_mut() {
        for edit in edits.iter_mut() {
            edit.range = to_host_range(fragment, edit.range, host);
        }
    }
}
