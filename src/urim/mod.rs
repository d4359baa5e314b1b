//! URI Trie Matcher: дерево ресурсов по URI с шаблонами `*` и `**` и
//! индекс по автору в хранилище.

pub mod matcher;
pub mod segment;
pub mod uri;

pub use matcher::*;
pub use segment::UriSegment;
pub use uri::*;
