use std::collections::BTreeMap;

use crate::store::{Array, AttrValue, Attrs};

/// Keyword arguments passed to a transform, keyed by option name.
pub type Kwargs = BTreeMap<String, AttrValue>;

// ---------------------------------------------------------------------------
// Output – one value returned by a transform
// ---------------------------------------------------------------------------

/// One output of a transform: a bare array, or an array carrying extra
/// attributes to be stored on the written dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Plain(Array),
    Annotated { data: Array, attributes: Attrs },
}

impl Output {
    pub fn annotated(data: Array) -> Self {
        Output::Annotated {
            data,
            attributes: Attrs::new(),
        }
    }

    /// Add an attribute, turning a plain output into an annotated one.
    pub fn with_attr(self, key: &str, value: impl Into<AttrValue>) -> Self {
        let (data, mut attributes) = match self {
            Output::Plain(data) => (data, Attrs::new()),
            Output::Annotated { data, attributes } => (data, attributes),
        };
        attributes.insert(key.to_string(), value.into());
        Output::Annotated { data, attributes }
    }

    pub fn data(&self) -> &Array {
        match self {
            Output::Plain(data) | Output::Annotated { data, .. } => data,
        }
    }

    pub fn attributes(&self) -> Option<&Attrs> {
        match self {
            Output::Plain(_) => None,
            Output::Annotated { attributes, .. } => Some(attributes),
        }
    }
}

impl From<Array> for Output {
    fn from(data: Array) -> Self {
        Output::Plain(data)
    }
}

// ---------------------------------------------------------------------------
// OptionSpec – declared options of a transform
// ---------------------------------------------------------------------------

/// The options a transform recognises, in declaration order, each with an
/// optional default. Every declared option is recorded on the outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSpec {
    options: Vec<(String, Option<AttrValue>)>,
}

impl OptionSpec {
    pub fn new() -> Self {
        OptionSpec {
            options: Vec::new(),
        }
    }

    /// Declare an option without a default.
    pub fn option(mut self, name: &str) -> Self {
        self.options.push((name.to_string(), None));
        self
    }

    /// Declare an option with a default value.
    pub fn with_default(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.options.push((name.to_string(), Some(value.into())));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&AttrValue>)> {
        self.options
            .iter()
            .map(|(name, default)| (name.as_str(), default.as_ref()))
    }
}

// ---------------------------------------------------------------------------
// Transform – the function contract
// ---------------------------------------------------------------------------

/// A function applied to input arrays.
///
/// `call` receives one array per input path plus the keyword arguments and
/// returns `None` for side-effect-only calls (nothing is written), or one
/// [`Output`] per output name.
pub trait Transform {
    /// Short name, used in the operation folder name.
    fn name(&self) -> &str;

    /// Namespace recorded in the `operation name` attribute.
    fn module(&self) -> Option<&str> {
        None
    }

    /// Declared options. `None` marks a foreign transform whose options
    /// cannot be described; its outputs carry a single marker attribute.
    fn options(&self) -> Option<&OptionSpec> {
        None
    }

    fn call(&self, inputs: &[Array], kwargs: &Kwargs) -> anyhow::Result<Option<Vec<Output>>>;

    /// `module.name`, or `None.name` when no module is set.
    fn qualified_name(&self) -> String {
        format!("{}.{}", self.module().unwrap_or("None"), self.name())
    }
}

type CallFn = dyn Fn(&[Array], &Kwargs) -> anyhow::Result<Option<Vec<Output>>>;

/// A [`Transform`] built from a closure.
pub struct Func {
    name: String,
    module: Option<String>,
    options: Option<OptionSpec>,
    call: Box<CallFn>,
}

impl Func {
    pub fn new<F>(name: &str, call: F) -> Self
    where
        F: Fn(&[Array], &Kwargs) -> anyhow::Result<Option<Vec<Output>>> + 'static,
    {
        Func {
            name: name.to_string(),
            module: None,
            options: None,
            call: Box::new(call),
        }
    }

    /// Wrap a one-input, one-output element-wise function.
    pub fn elementwise<F>(name: &str, f: F) -> Self
    where
        F: Fn(f64) -> f64 + 'static,
    {
        Func::new(name, move |inputs, _| {
            let first = inputs
                .first()
                .ok_or_else(|| anyhow::anyhow!("expected one input array"))?;
            Ok(Some(vec![Output::Plain(first.map(&f))]))
        })
    }

    pub fn in_module(mut self, module: &str) -> Self {
        self.module = Some(module.to_string());
        self
    }

    pub fn with_options(mut self, options: OptionSpec) -> Self {
        self.options = Some(options);
        self
    }
}

impl Transform for Func {
    fn name(&self) -> &str {
        &self.name
    }

    fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    fn options(&self) -> Option<&OptionSpec> {
        self.options.as_ref()
    }

    fn call(&self, inputs: &[Array], kwargs: &Kwargs) -> anyhow::Result<Option<Vec<Output>>> {
        (self.call)(inputs, kwargs)
    }
}
