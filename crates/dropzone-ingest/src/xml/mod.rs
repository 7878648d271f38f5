//! XML decoding: a streamed generic tree, then root-level type resolution

mod resolver;
mod tree;

pub use resolver::resolve;
pub use tree::{read_tree, XmlElement};

use dropzone_common::XmlDocument;
use tokio::io::{AsyncRead, BufReader};

use crate::error::Result;

/// Parse a complete document from a byte stream
pub async fn parse_document<R>(stream: R) -> Result<XmlDocument>
where
    R: AsyncRead + Unpin,
{
    let tree = read_tree(BufReader::new(stream)).await?;
    resolve(&tree)
}
