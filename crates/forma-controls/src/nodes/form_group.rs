//! Keyed container

use std::fmt;

use forma_core::{ControlError, ControlKey, ControlResult, Prop};

use crate::container::ControlsStore;
use crate::control::{Control, ControlKind, ControlOptions};
use crate::nodes::{build_container, AbstractControl};

/// Container whose children are addressed by name
#[derive(Clone, PartialEq, Eq)]
pub struct FormGroup(pub(crate) Control);

fn named_store<K, C>(children: impl IntoIterator<Item = (K, C)>) -> ControlsStore
where
    K: Into<String>,
    C: AbstractControl,
{
    ControlsStore::from_entries(
        children
            .into_iter()
            .map(|(key, child)| (ControlKey::Name(key.into()), child.into_control())),
    )
}

impl FormGroup {
    pub fn new<K, C>(children: impl IntoIterator<Item = (K, C)>) -> ControlResult<Self>
    where
        K: Into<String>,
        C: AbstractControl,
    {
        FormGroup::with_options(children, ControlOptions::default())
    }

    pub fn with_options<K, C>(children: impl IntoIterator<Item = (K, C)>, options: ControlOptions) -> ControlResult<Self>
    where
        K: Into<String>,
        C: AbstractControl,
    {
        build_container(ControlKind::Group, named_store(children), options).map(FormGroup)
    }

    pub fn control(&self, name: &str) -> Option<Control> {
        self.0.child(&ControlKey::from(name))
    }

    pub fn controls(&self) -> ControlsStore {
        self.0.controls_store()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.control(name).is_some()
    }

    /// Add a child under `name`. Does nothing when the name is taken.
    pub fn add_control(&self, name: impl Into<String>, control: impl AbstractControl) -> ControlResult<Vec<Prop>> {
        let key = ControlKey::Name(name.into());
        if self.0.controls_store().contains_key(&key) {
            return Ok(Vec::new());
        }
        let control = control.into_control();
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            if !next.contains_key(&key) {
                next.insert(key.clone(), control.clone());
            }
            next
        })
    }

    /// Add or replace the child under `name`
    pub fn set_control(&self, name: impl Into<String>, control: impl AbstractControl) -> ControlResult<Vec<Prop>> {
        let key = ControlKey::Name(name.into());
        let control = control.into_control();
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.insert(key.clone(), control.clone());
            next
        })
    }

    /// Remove the child under `name`, if any
    pub fn remove_control(&self, name: &str) -> ControlResult<Vec<Prop>> {
        let key = ControlKey::from(name);
        if !self.0.controls_store().contains_key(&key) {
            return Ok(Vec::new());
        }
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.remove(&key);
            next
        })
    }

    /// Replace every child
    pub fn set_controls<K, C>(&self, children: impl IntoIterator<Item = (K, C)>) -> ControlResult<Vec<Prop>>
    where
        K: Into<String>,
        C: AbstractControl,
    {
        self.0.set_controls(named_store(children))
    }

    pub fn deep_clone(&self) -> ControlResult<FormGroup> {
        self.0.deep_clone().map(FormGroup)
    }
}

impl TryFrom<Control> for FormGroup {
    type Error = ControlError;

    fn try_from(control: Control) -> ControlResult<Self> {
        match control.kind() {
            ControlKind::Group => Ok(FormGroup(control)),
            _ => Err(ControlError::InvalidValue {
                control: control.id().clone(),
                reason: "not a group".to_string(),
            }),
        }
    }
}

impl fmt::Debug for FormGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormGroup")
            .field("id", self.0.id())
            .field("controls", &self.0.controls_store())
            .field("status", &self.0.status())
            .finish()
    }
}
