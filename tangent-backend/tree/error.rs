/// Integrity violations raised by the conversation tree.
///
/// These indicate a caller bug (stale id, wrong node kind) rather than a
/// user-facing condition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    #[error("dangling edge {edge}: endpoint {missing} does not exist")]
    DanglingEdge { edge: String, missing: String },

    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node is not a message node: {0}")]
    NotAMessage(String),

    #[error("cycle detected at {0}")]
    Cycle(String),

    #[error("anchor {0} already leads to a node")]
    AnchorOccupied(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_edge_names_missing_endpoint() {
        let err = TreeError::DanglingEdge {
            edge: "eroot-n9".into(),
            missing: "n9".into(),
        };
        assert_eq!(
            err.to_string(),
            "dangling edge eroot-n9: endpoint n9 does not exist"
        );
    }

    #[test]
    fn not_found_displays_id() {
        assert_eq!(TreeError::NotFound("n1".into()).to_string(), "node not found: n1");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TreeError>();
    }
}
