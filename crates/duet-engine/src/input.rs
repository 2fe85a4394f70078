//! Per-frame local input, filled by the host and read by client systems.

/// Controls held or pressed during the current frame.
///
/// `move_x` is in `[-1, 1]`; `aim` is a direction relative to the player.
/// Press flags (`jump`, `shoot_portal`, `attack`) are consumed by the input
/// system, so one press yields one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputContext {
    /// Player slot this client controls, once the room has assigned one.
    pub player: Option<u8>,
    pub move_x: f32,
    pub jump: bool,
    pub aim: (f32, f32),
    pub shoot_portal: bool,
    pub attack: bool,
    /// Last horizontal intent sent, so an unchanged hold is not resent.
    pub last_move_x: f32,
}

impl InputContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the press flags, clearing them.
    pub fn take_presses(&mut self) -> (bool, bool, bool) {
        (
            std::mem::take(&mut self.jump),
            std::mem::take(&mut self.shoot_portal),
            std::mem::take(&mut self.attack),
        )
    }
}
