// Scoped release stack
//
// Every Vulkan object we create registers its destroy call here right after
// the create call succeeds. Releasing pops newest-first, so teardown is the
// exact inverse of acquisition no matter where initialization stopped.

type Release = Box<dyn FnOnce()>;

/// LIFO of labelled release actions, run once on `release_all` or drop
pub struct ReleaseStack {
    owner: &'static str,
    entries: Vec<(&'static str, Release)>,
}

impl ReleaseStack {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    /// Register the release for a resource that was just acquired
    pub fn push(&mut self, label: &'static str, release: impl FnOnce() + 'static) {
        log::trace!("[{}] acquired {}", self.owner, label);
        self.entries.push((label, Box::new(release)));
    }

    /// `push` for a release that needs `owner` to run, e.g. a loader or device handle
    pub fn push_with<T: 'static>(
        &mut self,
        label: &'static str,
        owner: T,
        release: impl FnOnce(T) + 'static,
    ) {
        self.push(label, move || release(owner));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in acquisition order
    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(label, _)| *label)
    }

    /// Release everything, newest first. Calling again is a no-op.
    pub fn release_all(&mut self) {
        if self.entries.is_empty() {
            return;
        }

        log::debug!("[{}] releasing {} resources", self.owner, self.entries.len());

        while let Some((label, release)) = self.entries.pop() {
            log::trace!("[{}] releasing {}", self.owner, label);
            release();
        }
    }
}

impl ReleaseStack {
    /// Run `drain` and release everything only if it succeeds.
    ///
    /// On failure the resources may still be in use, so every release action
    /// is discarded without running and the handles stay alive.
    pub fn release_after<E>(&mut self, drain: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        if let Err(e) = drain() {
            self.abandon();
            return Err(e);
        }
        self.release_all();
        Ok(())
    }

    fn abandon(&mut self) {
        if !self.entries.is_empty() {
            log::error!(
                "[{}] leaving {} resources alive, they may still be in use",
                self.owner,
                self.entries.len()
            );
        }
        self.entries.clear();
    }
}

impl Drop for ReleaseStack {
    fn drop(&mut self) {
        self.release_all();
    }
}
