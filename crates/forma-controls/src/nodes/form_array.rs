//! Indexed container

use std::fmt;

use forma_core::{ControlError, ControlKey, ControlResult, Prop};

use crate::container::ControlsStore;
use crate::control::{Control, ControlKind, ControlOptions};
use crate::nodes::{build_container, AbstractControl};

/// Container whose children are addressed by position. Keys are always
/// `0..len`; removing or inserting re-indexes the tail.
#[derive(Clone, PartialEq, Eq)]
pub struct FormArray(pub(crate) Control);

fn indexed_store<C: AbstractControl>(children: impl IntoIterator<Item = C>) -> ControlsStore {
    ControlsStore::from_entries(
        children
            .into_iter()
            .enumerate()
            .map(|(i, child)| (ControlKey::Index(i), child.into_control())),
    )
}

impl FormArray {
    pub fn new<C: AbstractControl>(children: impl IntoIterator<Item = C>) -> ControlResult<Self> {
        FormArray::with_options(children, ControlOptions::default())
    }

    pub fn with_options<C: AbstractControl>(
        children: impl IntoIterator<Item = C>,
        options: ControlOptions,
    ) -> ControlResult<Self> {
        build_container(ControlKind::Array, indexed_store(children), options).map(FormArray)
    }

    pub fn control(&self, index: usize) -> Option<Control> {
        self.0.child(&ControlKey::Index(index))
    }

    pub fn controls(&self) -> ControlsStore {
        self.0.controls_store()
    }

    fn check_index(&self, index: usize, len: usize) -> ControlResult<()> {
        if index > len {
            return Err(ControlError::InvalidKey {
                control: self.0.id().clone(),
                key: ControlKey::Index(index),
            });
        }
        Ok(())
    }

    /// Append a child
    pub fn push(&self, control: impl AbstractControl) -> ControlResult<Vec<Prop>> {
        let control = control.into_control();
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.insert_at(store.len(), ControlKey::Index(store.len()), control.clone());
            next
        })
    }

    /// Insert a child at `index`, shifting later children up
    pub fn insert(&self, index: usize, control: impl AbstractControl) -> ControlResult<Vec<Prop>> {
        self.check_index(index, self.0.size())?;
        let control = control.into_control();
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.insert_at(index, ControlKey::Index(index), control.clone());
            next
        })
    }

    /// Replace the child at `index`. `index == len` appends.
    pub fn set_control(&self, index: usize, control: impl AbstractControl) -> ControlResult<Vec<Prop>> {
        self.check_index(index, self.0.size())?;
        let control = control.into_control();
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.insert(ControlKey::Index(index.min(store.len())), control.clone());
            next
        })
    }

    /// Remove the child at `index`, shifting later children down
    pub fn remove_control(&self, index: usize) -> ControlResult<Vec<Prop>> {
        if index >= self.0.size() {
            return Err(ControlError::InvalidKey {
                control: self.0.id().clone(),
                key: ControlKey::Index(index),
            });
        }
        self.0.update_controls(move |store| {
            let mut next = store.clone();
            next.remove(&ControlKey::Index(index));
            next
        })
    }

    /// Replace every child
    pub fn set_controls<C: AbstractControl>(&self, children: impl IntoIterator<Item = C>) -> ControlResult<Vec<Prop>> {
        self.0.set_controls(indexed_store(children))
    }

    pub fn deep_clone(&self) -> ControlResult<FormArray> {
        self.0.deep_clone().map(FormArray)
    }
}

impl TryFrom<Control> for FormArray {
    type Error = ControlError;

    fn try_from(control: Control) -> ControlResult<Self> {
        match control.kind() {
            ControlKind::Array => Ok(FormArray(control)),
            _ => Err(ControlError::InvalidValue {
                control: control.id().clone(),
                reason: "not an array".to_string(),
            }),
        }
    }
}

impl fmt::Debug for FormArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormArray")
            .field("id", self.0.id())
            .field("size", &self.0.size())
            .field("status", &self.0.status())
            .finish()
    }
}
