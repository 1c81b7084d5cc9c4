pub mod grammar;
pub mod position_mapping;
pub mod scanner;
pub mod virtual_document;
pub mod virtual_uri;

pub use grammar::{GrammarEntry, GrammarMode, grammar_for, language_id_for_tag};
pub use position_mapping::{EditSpan, TextCoordinates, to_host_completion, to_host_position, to_host_range, to_local_position, to_local_range};
pub use scanner::{Fragment, ScanCursor, scan};
pub use virtual_document::{FragmentCollection, FragmentStore};
pub use virtual_uri::{FRAGMENT_SCHEME, HostId, IdentityFormatError, VirtualId, is_valid_language_tag};
