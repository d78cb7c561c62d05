//! Property names
//!
//! Every observable property of a control has a [`Prop`]. State changes name
//! their primary property and list the properties that changed as a
//! consequence, so observers know what to re-read.

use std::fmt;
use std::str::FromStr;

use crate::ControlError;

/// Boolean meta-property that containers quantify over their children
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Disabled,
    Touched,
    Dirty,
    Readonly,
    Submitted,
    Pending,
    Valid,
    Invalid,
}

impl Flag {
    pub const ALL: [Flag; 8] = [
        Flag::Disabled,
        Flag::Touched,
        Flag::Dirty,
        Flag::Readonly,
        Flag::Submitted,
        Flag::Pending,
        Flag::Valid,
        Flag::Invalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Flag::Disabled => "Disabled",
            Flag::Touched => "Touched",
            Flag::Dirty => "Dirty",
            Flag::Readonly => "Readonly",
            Flag::Submitted => "Submitted",
            Flag::Pending => "Pending",
            Flag::Valid => "Valid",
            Flag::Invalid => "Invalid",
        }
    }

    /// The plain property carrying this flag on a single control
    pub fn prop(self) -> Prop {
        match self {
            Flag::Disabled => Prop::Disabled,
            Flag::Touched => Prop::Touched,
            Flag::Dirty => Prop::Dirty,
            Flag::Readonly => Prop::Readonly,
            Flag::Submitted => Prop::Submitted,
            Flag::Pending => Prop::Pending,
            Flag::Valid => Prop::Valid,
            Flag::Invalid => Prop::Invalid,
        }
    }
}

/// Observable property of a control
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Prop {
    Value,
    RawValue,
    EnabledValue,
    Disabled,
    Enabled,
    Touched,
    Dirty,
    Readonly,
    Submitted,
    Pending,
    PendingStore,
    Errors,
    ErrorsStore,
    Validator,
    ValidatorStore,
    Status,
    Valid,
    Invalid,
    Parent,
    Data,
    ControlsStore,
    Controls,
    Size,
    ChildrenErrors,
    /// At least one considered child has the flag
    Child(Flag),
    /// Every considered child has the flag (and there is at least one)
    Children(Flag),
}

impl Prop {
    /// Properties whose observers wait for the validation barrier
    pub fn is_value_like(self) -> bool {
        matches!(self, Prop::Value | Prop::RawValue | Prop::EnabledValue)
    }

    pub fn name(self) -> String {
        match self {
            Prop::Child(flag) => format!("child{}", flag.as_str()),
            Prop::Children(flag) => format!("children{}", flag.as_str()),
            other => other.simple_name().to_string(),
        }
    }

    fn simple_name(self) -> &'static str {
        match self {
            Prop::Value => "value",
            Prop::RawValue => "rawValue",
            Prop::EnabledValue => "enabledValue",
            Prop::Disabled => "disabled",
            Prop::Enabled => "enabled",
            Prop::Touched => "touched",
            Prop::Dirty => "dirty",
            Prop::Readonly => "readonly",
            Prop::Submitted => "submitted",
            Prop::Pending => "pending",
            Prop::PendingStore => "pendingStore",
            Prop::Errors => "errors",
            Prop::ErrorsStore => "errorsStore",
            Prop::Validator => "validator",
            Prop::ValidatorStore => "validatorStore",
            Prop::Status => "status",
            Prop::Valid => "valid",
            Prop::Invalid => "invalid",
            Prop::Parent => "parent",
            Prop::Data => "data",
            Prop::ControlsStore => "controlsStore",
            Prop::Controls => "controls",
            Prop::Size => "size",
            Prop::ChildrenErrors => "childrenErrors",
            Prop::Child(_) | Prop::Children(_) => "",
        }
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Prop {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let simple = [
            Prop::Value,
            Prop::RawValue,
            Prop::EnabledValue,
            Prop::Disabled,
            Prop::Enabled,
            Prop::Touched,
            Prop::Dirty,
            Prop::Readonly,
            Prop::Submitted,
            Prop::Pending,
            Prop::PendingStore,
            Prop::Errors,
            Prop::ErrorsStore,
            Prop::Validator,
            Prop::ValidatorStore,
            Prop::Status,
            Prop::Valid,
            Prop::Invalid,
            Prop::Parent,
            Prop::Data,
            Prop::ControlsStore,
            Prop::Controls,
            Prop::Size,
            Prop::ChildrenErrors,
        ];
        if let Some(prop) = simple.into_iter().find(|p| p.simple_name() == s) {
            return Ok(prop);
        }

        for flag in Flag::ALL {
            if s.strip_prefix("children") == Some(flag.as_str()) {
                return Ok(Prop::Children(flag));
            }
            if s.strip_prefix("child") == Some(flag.as_str()) {
                return Ok(Prop::Child(flag));
            }
        }

        Err(ControlError::UnknownProperty(s.to_string()))
    }
}

/// Derived validity status, checked in priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ControlStatus {
    Disabled,
    Pending,
    Invalid,
    #[default]
    Valid,
}

impl ControlStatus {
    pub fn derive(disabled: bool, pending: bool, has_errors: bool) -> Self {
        if disabled {
            ControlStatus::Disabled
        } else if pending {
            ControlStatus::Pending
        } else if has_errors {
            ControlStatus::Invalid
        } else {
            ControlStatus::Valid
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControlStatus::Disabled => "DISABLED",
            ControlStatus::Pending => "PENDING",
            ControlStatus::Invalid => "INVALID",
            ControlStatus::Valid => "VALID",
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
