// Audio service
//
// No audio engine sits behind this yet. Consumers receive an explicitly
// constructed `AudioService` and call through it; until a provider is
// registered every call lands on `NullAudio`.

pub type SoundId = u32;

pub trait Audio {
    fn play_sound(&mut self, sound: SoundId);
    fn stop_sound(&mut self, sound: SoundId);
}

/// Accepts every call and does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl Audio for NullAudio {
    fn play_sound(&mut self, _sound: SoundId) {}
    fn stop_sound(&mut self, _sound: SoundId) {}
}

/// Holds the active audio provider, falling back to [`NullAudio`]
#[derive(Default)]
pub struct AudioService {
    provider: Option<Box<dyn Audio>>,
    null: NullAudio,
}

impl AudioService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a provider; `None` restores the null provider
    pub fn register(&mut self, provider: Option<Box<dyn Audio>>) {
        match &provider {
            Some(_) => log::info!("Audio provider registered"),
            None => log::info!("Audio provider cleared, using null audio"),
        }
        self.provider = provider;
    }

    pub fn is_null(&self) -> bool {
        self.provider.is_none()
    }

    pub fn audio(&mut self) -> &mut dyn Audio {
        match self.provider.as_deref_mut() {
            Some(provider) => provider,
            None => &mut self.null,
        }
    }
}
