//! Typed helpers for Klipper's `objects/subscribe` endpoint.
//!
//! An [`ObjectsQuery`] lists printer objects and, per object, the attributes
//! to watch. [`KlipperClient::subscribe_objects`] forwards it unchanged and
//! decodes every push into an [`ObjectsUpdate`] whose `status` has whatever
//! shape the caller names, typically a struct with one optional field per
//! queried object.
//!
//! [`KlipperClient::subscribe_objects`]: crate::client::KlipperClient::subscribe_objects

use std::{
    collections::BTreeMap,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{client::Subscription, protocol::Object};

/// Printer objects and attributes to watch.
///
/// # Examples
///
/// ```
/// use klipper_wire::endpoints::ObjectsQuery;
/// use serde_json::json;
///
/// let query = ObjectsQuery::new()
///     .object("toolhead", ["homed_axes"])
///     .all_attributes("webhooks");
/// assert_eq!(
///     serde_json::Value::Object(query.to_params()),
///     json!({"objects": {"toolhead": ["homed_axes"], "webhooks": null}})
/// );
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectsQuery {
    objects: BTreeMap<String, Option<Vec<String>>>,
}

impl ObjectsQuery {
    /// Method name of the subscription endpoint.
    pub const SUBSCRIBE_METHOD: &'static str = "objects/subscribe";

    /// Create an empty query.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Watch `attributes` of `name`. An empty list watches every attribute.
    #[must_use]
    pub fn object<I, A>(mut self, name: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let attributes: Vec<String> = attributes.into_iter().map(Into::into).collect();
        let attributes = (!attributes.is_empty()).then_some(attributes);
        self.objects.insert(name.into(), attributes);
        self
    }

    /// Watch every attribute of `name`.
    #[must_use]
    pub fn all_attributes(mut self, name: impl Into<String>) -> Self {
        self.objects.insert(name.into(), None);
        self
    }

    /// Merge the objects of `other` into this query; `other` wins on clashes.
    #[must_use]
    pub fn merge(mut self, other: ObjectsQuery) -> Self {
        self.objects.extend(other.objects);
        self
    }

    /// Returns `true` if no object is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.objects.is_empty() }

    /// Request parameters: `{"objects": {name: [attributes] | null}}`.
    #[must_use]
    pub fn to_params(&self) -> Object {
        let objects = self
            .objects
            .iter()
            .map(|(name, attributes)| {
                let attributes = attributes.as_ref().map_or(Value::Null, |list| {
                    Value::Array(list.iter().cloned().map(Value::String).collect())
                });
                (name.clone(), attributes)
            })
            .collect::<Object>();
        let mut params = Object::new();
        params.insert("objects".to_owned(), Value::Object(objects));
        params
    }
}

/// One `objects/subscribe` push.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ObjectsUpdate<S> {
    /// Klipper's monotonic clock at the time of the update.
    pub eventtime: f64,
    /// Changed attributes, grouped by object.
    pub status: S,
}

/// Typed stream of object updates.
///
/// Each item is the decoded push, or the decode error if the payload did not
/// match `S`. The stream ends with the underlying subscription.
pub struct ObjectsSubscription<S> {
    inner: Subscription,
    _status: PhantomData<fn() -> S>,
}

impl<S> ObjectsSubscription<S>
where
    S: DeserializeOwned,
{
    pub(crate) fn new(inner: Subscription) -> Self {
        Self {
            inner,
            _status: PhantomData,
        }
    }

    /// Wait for the next update; `None` once the subscription ended.
    pub async fn next_update(&mut self) -> Option<Result<ObjectsUpdate<S>, serde_json::Error>> {
        self.inner.next_update().await.map(decode)
    }

    /// Return the untyped subscription.
    #[must_use]
    pub fn into_inner(self) -> Subscription { self.inner }
}

impl<S> Stream for ObjectsSubscription<S>
where
    S: DeserializeOwned,
{
    type Item = Result<ObjectsUpdate<S>, serde_json::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|update| update.map(decode))
    }
}

fn decode<S: DeserializeOwned>(params: Object) -> Result<ObjectsUpdate<S>, serde_json::Error> {
    serde_json::from_value(Value::Object(params))
}
