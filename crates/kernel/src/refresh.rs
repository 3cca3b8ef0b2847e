/// Whether the tiling texture cache reflects the current texture and tint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshState {
    Clean,
    #[default]
    NeedsSynthesis,
}

/// Named causes of a cache state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshEvent {
    Constructed,
    TextureSwapped,
    TintChanged,
    /// Raised only by a successful synthesis inside a render call.
    Synthesized,
}

impl RefreshState {
    pub fn on(self, event: RefreshEvent) -> Self {
        match event {
            RefreshEvent::Synthesized => Self::Clean,
            RefreshEvent::Constructed | RefreshEvent::TextureSwapped | RefreshEvent::TintChanged => {
                Self::NeedsSynthesis
            }
        }
    }

    pub fn needs_synthesis(self) -> bool {
        self == Self::NeedsSynthesis
    }
}
