use bitflags::bitflags;

bitflags! {
    /// Optional input devices announced to the console at stream start.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputFeatures: u32 {
        const KEYBOARD  = 0x1;
        const DUALSENSE = 0x2;
        const MOTION    = 0x4;
        const TOUCHPAD  = 0x8;
    }
}
