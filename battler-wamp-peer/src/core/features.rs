use battler_wamp_values::WampDictionary;

/// Advanced features announced by the caller role.
#[derive(Debug, Default, Clone, WampDictionary)]
pub struct CallerFeatures {
    /// The caller may disclose its identity to callees.
    #[battler_wamp_values(default)]
    pub caller_identification: bool,
    /// The caller accepts progressive results.
    #[battler_wamp_values(default)]
    pub progressive_call_results: bool,
    /// The caller may actively cancel a procedure call.
    #[battler_wamp_values(default)]
    pub call_canceling: bool,
}

impl CallerFeatures {
    pub fn supported() -> Self {
        Self {
            caller_identification: true,
            progressive_call_results: true,
            call_canceling: true,
        }
    }
}

/// Advanced features announced by the callee role.
#[derive(Debug, Default, Clone, WampDictionary)]
pub struct CalleeFeatures {
    #[battler_wamp_values(default)]
    pub call_canceling: bool,
    #[battler_wamp_values(default)]
    pub caller_identification: bool,
    #[battler_wamp_values(default)]
    pub pattern_based_registration: bool,
    #[battler_wamp_values(default)]
    pub shared_registration: bool,
    #[battler_wamp_values(default)]
    pub progressive_call_results: bool,
    /// The router may unregister the callee's procedures on its own.
    #[battler_wamp_values(default)]
    pub registration_revocation: bool,
}

impl CalleeFeatures {
    pub fn supported() -> Self {
        Self {
            call_canceling: true,
            caller_identification: true,
            pattern_based_registration: true,
            shared_registration: true,
            progressive_call_results: true,
            registration_revocation: true,
        }
    }
}

/// Advanced features announced by the publisher role.
#[derive(Debug, Default, Clone, WampDictionary)]
pub struct PublisherFeatures {
    #[battler_wamp_values(default)]
    pub publisher_identification: bool,
    #[battler_wamp_values(default)]
    pub subscriber_blackwhite_listing: bool,
    #[battler_wamp_values(default)]
    pub publisher_exclusion: bool,
}

impl PublisherFeatures {
    pub fn supported() -> Self {
        Self {
            publisher_identification: true,
            subscriber_blackwhite_listing: true,
            publisher_exclusion: true,
        }
    }
}

/// Advanced features announced by the subscriber role.
#[derive(Debug, Default, Clone, WampDictionary)]
pub struct SubscriberFeatures {
    #[battler_wamp_values(default)]
    pub publisher_identification: bool,
    #[battler_wamp_values(default)]
    pub pattern_based_subscription: bool,
    /// The router may unsubscribe the subscriber on its own.
    #[battler_wamp_values(default)]
    pub subscription_revocation: bool,
}

impl SubscriberFeatures {
    pub fn supported() -> Self {
        Self {
            publisher_identification: true,
            pattern_based_subscription: true,
            subscription_revocation: true,
        }
    }
}
