//! Request bodies and their conversion to wire form.
//!
//! A body reaches the transport as a [`WireBody`]. Types that know how to
//! encode themselves implement [`BodyProcessor`]; types that don't (or that
//! need destination-specific encoding) get a transform registered in a
//! [`BodyProcessors`] table. Either way, the caller converts the body before
//! the [`RequestSpec`](crate::RequestSpec) is frozen, so nothing is inspected
//! at send time.

use crate::{Error, Result};
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A request body in the form the transport sends.
#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    /// `application/json`
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`, fields kept in order.
    Form(Vec<(String, String)>),
    /// Pre-encoded text with an explicit content type.
    Text {
        /// Value of the `Content-Type` header
        content_type: String,
        /// The encoded body
        body: String,
    },
}

impl WireBody {
    /// Serializes `value` to a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if serialization fails.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(WireBody::Json)
            .map_err(|e| Error::SerializationFailed(e.to_string()))
    }

    /// Builds a form body from key/value pairs.
    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        WireBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The `Content-Type` this body is sent with.
    pub fn content_type(&self) -> &str {
        match self {
            WireBody::Json(_) => "application/json",
            WireBody::Form(_) => "application/x-www-form-urlencoded",
            WireBody::Text { content_type, .. } => content_type,
        }
    }
}

/// A body that can convert itself to wire form.
///
/// # Examples
///
/// ```
/// use outcall::{BodyProcessor, WireBody};
///
/// struct Comment {
///     text: String,
/// }
///
/// impl BodyProcessor for Comment {
///     fn to_wire(&self) -> outcall::Result<WireBody> {
///         Ok(WireBody::form([("text", self.text.as_str())]))
///     }
/// }
/// ```
pub trait BodyProcessor {
    /// Produces the wire representation of this body.
    fn to_wire(&self) -> Result<WireBody>;
}

type Transform = Arc<dyn Fn(&dyn Any) -> Result<WireBody> + Send + Sync>;

/// A table of body transforms keyed by body type.
///
/// # Examples
///
/// ```
/// use outcall::{BodyProcessors, WireBody};
///
/// struct Label(String);
///
/// let mut processors = BodyProcessors::new();
/// processors.register(|label: &Label| Ok(WireBody::form([("name", label.0.as_str())])));
///
/// let wire = processors.process(&Label("urgent".into())).unwrap();
/// assert_eq!(wire.content_type(), "application/x-www-form-urlencoded");
///
/// // Types without a transform are rejected.
/// assert!(processors.process(&42u32).is_err());
/// ```
#[derive(Clone, Default)]
pub struct BodyProcessors {
    transforms: HashMap<TypeId, Transform>,
}

impl BodyProcessors {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transform` for bodies of type `T`, replacing any previous one.
    pub fn register<T, F>(&mut self, transform: F) -> &mut Self
    where
        T: Any,
        F: Fn(&T) -> Result<WireBody> + Send + Sync + 'static,
    {
        let transform: Transform = Arc::new(move |body: &dyn Any| match body.downcast_ref::<T>() {
            Some(body) => transform(body),
            None => Err(Error::BodyProcessing(format!(
                "transform for `{}` received a different type",
                type_name::<T>()
            ))),
        });
        self.transforms.insert(TypeId::of::<T>(), transform);
        self
    }

    /// Registers `T`'s own [`BodyProcessor`] implementation.
    pub fn register_processor<T: BodyProcessor + Any>(&mut self) -> &mut Self {
        self.register(|body: &T| body.to_wire())
    }

    /// Registers a JSON transform for `T`.
    pub fn register_json<T: Serialize + Any>(&mut self) -> &mut Self {
        self.register(|body: &T| WireBody::json(body))
    }

    /// Returns `true` if a transform exists for `T`.
    pub fn supports<T: Any>(&self) -> bool {
        self.transforms.contains_key(&TypeId::of::<T>())
    }

    /// Converts `body` to wire form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyProcessing`] if no transform is registered for `T`,
    /// or whatever error the transform itself returns.
    pub fn process<T: Any>(&self, body: &T) -> Result<WireBody> {
        let transform = self.transforms.get(&TypeId::of::<T>()).ok_or_else(|| {
            Error::BodyProcessing(format!(
                "no wire transform registered for `{}`",
                type_name::<T>()
            ))
        })?;
        transform(body)
    }
}

impl std::fmt::Debug for BodyProcessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyProcessors")
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
