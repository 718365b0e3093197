//! Settings override utility for tests.
//!
//! Provides [`override_settings`] to temporarily swap engine [`Settings`]
//! values for the duration of a closure, then restore the originals. Uses a
//! thread-local stack to maintain isolation even across nested overrides.
//! [`fixtures::orm`](crate::fixtures::orm) builds its engine from
//! [`current_settings`].
//!
//! ## Example
//!
//! ```rust
//! use relorm_test::override_settings::{current_settings, override_settings, SettingsOverride};
//!
//! let overrides = SettingsOverride::new().set_validate_on_write(false);
//!
//! override_settings(overrides, || {
//!     assert!(!current_settings().validate_on_write);
//! });
//! assert!(current_settings().validate_on_write);
//! ```

use std::cell::RefCell;

use relorm_core::settings::Settings;

thread_local! {
    /// Thread-local stack of settings overrides.
    ///
    /// The top of the stack is the active override. When empty, default
    /// settings are used.
    static SETTINGS_STACK: RefCell<Vec<Settings>> = const { RefCell::new(Vec::new()) };
}

/// A builder for specifying which settings to override.
///
/// Starts from [`Settings::default()`] and allows selective modification.
pub struct SettingsOverride {
    settings: Settings,
}

impl Default for SettingsOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsOverride {
    /// Creates a new override builder starting from default settings.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    /// Creates a new override builder starting from the given settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    /// Sets the default database name.
    #[must_use]
    pub fn set_default_database(mut self, name: &str) -> Self {
        self.settings.default_database = name.to_string();
        self
    }

    /// Sets the default loading strategy.
    #[must_use]
    pub fn set_default_strategy(mut self, name: &str) -> Self {
        self.settings.default_strategy = name.to_string();
        self
    }

    /// Sets the descriptor cache TTL.
    #[must_use]
    pub const fn set_descriptor_ttl_secs(mut self, ttl: Option<u64>) -> Self {
        self.settings.descriptor_ttl_secs = ttl;
        self
    }

    /// Sets whether entities are validated before writes.
    #[must_use]
    pub const fn set_validate_on_write(mut self, validate: bool) -> Self {
        self.settings.validate_on_write = validate;
        self
    }

    /// Sets the `debug` flag.
    #[must_use]
    pub const fn set_debug(mut self, debug: bool) -> Self {
        self.settings.debug = debug;
        self
    }

    /// Returns the built settings.
    pub fn build(self) -> Settings {
        self.settings
    }
}

/// Temporarily overrides settings for the duration of the closure.
///
/// Pushes the overridden settings onto the thread-local stack, executes the
/// closure, and pops the settings afterward, even if the closure panics.
pub fn override_settings<F, R>(overrides: SettingsOverride, f: F) -> R
where
    F: FnOnce() -> R,
{
    struct PopGuard;
    impl Drop for PopGuard {
        fn drop(&mut self) {
            SETTINGS_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }

    SETTINGS_STACK.with(|stack| {
        stack.borrow_mut().push(overrides.build());
    });

    let _guard = PopGuard;
    f()
}

/// Returns the currently active settings override, or default settings if
/// no override is active.
pub fn current_settings() -> Settings {
    SETTINGS_STACK.with(|stack| stack.borrow().last().cloned().unwrap_or_default())
}
