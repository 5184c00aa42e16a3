/// This struct is used to configure optional behaviour within the ESI processor.
///
/// ## Usage Example
/// ```rust,no_run
/// let config = edge_esi::Configuration::default()
///     .with_namespace("app");
/// ```
#[allow(clippy::return_self_not_must_use)]
#[derive(Clone, Debug)]
pub struct Configuration {
    /// The namespace that identifies ESI instructions, e.g. `esi` matches
    /// tags like `<esi:include>`.
    pub namespace: String,
    /// For working with non-HTML ESI templates, e.g. JSON files, this option
    /// allows you to disable the unescaping of `src`/`alt` URLs.
    pub is_escaped_content: bool,
    /// What to do with an `<esi:include>` that has no `src` attribute.
    pub missing_src_policy: MissingSrcPolicy,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            namespace: String::from("esi"),
            is_escaped_content: true,
            missing_src_policy: MissingSrcPolicy::default(),
        }
    }
}

impl Configuration {
    /// Sets an alternative ESI namespace, which is used to identify ESI instructions.
    ///
    /// For example, setting this to `test` would cause the processor to only match tags like `<test:include>`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// For working with non-HTML ESI templates, eg JSON files, allows to disable URLs unescaping
    pub fn with_escaped(mut self, is_escaped: impl Into<bool>) -> Self {
        self.is_escaped_content = is_escaped.into();
        self
    }

    /// Sets the behaviour for include tags that carry no `src` attribute.
    pub fn with_missing_src_policy(mut self, policy: MissingSrcPolicy) -> Self {
        self.missing_src_policy = policy;
        self
    }
}

/// Behaviour for an include directive whose `src` attribute is absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MissingSrcPolicy {
    /// Contribute an empty string and carry on.
    #[default]
    Ignore,
    /// Re-emit the original tag text unprocessed.
    PassThrough,
    /// Fail the document evaluation.
    Fail,
}
