use super::Position;

/// Horizontal distance between a branch source and the spawned node.
pub const BRANCH_OFFSET_X: f64 = 460.0;
/// Vertical drop for a branch that has no anchor point.
pub const BRANCH_OFFSET_Y: f64 = 300.0;
/// Gap between a completed node's rendered bottom edge and its follow-up.
pub const FOLLOW_UP_GAP: f64 = 28.0;

/// Where a branched node goes. An anchor keeps the child level with the
/// selected passage; without one it drops below and to the right of the source.
pub fn branch_position(source: Position, anchor: Option<Position>) -> Position {
    match anchor {
        Some(anchor) => anchor.offset(BRANCH_OFFSET_X, 0.0),
        None => source.offset(BRANCH_OFFSET_X, BRANCH_OFFSET_Y),
    }
}

pub fn follow_up_position(parent: Position, rendered_height: f64) -> Position {
    parent.offset(0.0, rendered_height.max(0.0) + FOLLOW_UP_GAP)
}
