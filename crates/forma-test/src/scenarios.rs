//! End-to-end form scenarios
//!
//! A sign-up form wired the way an application would wire it:
//! - required and length validators on the fields
//! - an async uniqueness check on the username
//! - an indexed list of tags

use std::sync::Arc;

use forma_controls::{ControlOptions, FormArray, FormControl, FormGroup, ValidationService};
use forma_core::{single_error, ControlId, ControlResult, ControlStatus, Validator};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

// ============================================================================
// SIGN-UP FORM
// ============================================================================

/// Sign-up form with a simulated remote uniqueness check
pub struct SignupForm {
    pub form: FormGroup,
    pub username: FormControl,
    pub password: FormControl,
    pub tags: FormArray,
    /// Usernames waiting for the remote check, oldest first
    checks: Arc<Mutex<Vec<Value>>>,
    source: ControlId,
    _uniqueness: ValidationService,
}

impl SignupForm {
    pub fn new() -> ControlResult<Self> {
        let username = FormControl::with_options(json!(""), ControlOptions::new().validator(Validator::required()))?;
        let password = FormControl::with_options(
            json!(""),
            ControlOptions::new().validators(vec![Validator::required(), Validator::min_length(8)]),
        )?;
        let tags = FormArray::new(Vec::<FormControl>::new())?;
        let form = FormGroup::new([
            ("username", forma_controls::Control::from(username.clone())),
            ("password", password.clone().into()),
            ("tags", tags.clone().into()),
        ])?;

        let source = ControlId::named("uniqueness");
        let checks = Arc::new(Mutex::new(Vec::new()));
        let uniqueness = {
            let checks = checks.clone();
            let source = source.clone();
            username.async_validation_service(source.clone(), move |control, _| {
                checks.lock().push(control.value());
                // queued behind the running drain
                if let Err(err) = control.mark_pending_by(true, source.clone()) {
                    warn!(control = %control.id(), %err, "could not mark uniqueness check pending");
                }
            })
        };

        Ok(SignupForm {
            form,
            username,
            password,
            tags,
            checks,
            source,
            _uniqueness: uniqueness,
        })
    }

    pub fn pending_checks(&self) -> Vec<Value> {
        self.checks.lock().clone()
    }

    /// Answer the oldest outstanding uniqueness check
    pub fn resolve_check(&self, taken: bool) -> ControlResult<()> {
        let outstanding = {
            let mut checks = self.checks.lock();
            if checks.is_empty() {
                return Ok(());
            }
            checks.remove(0);
            !checks.is_empty()
        };
        let errors = taken.then(|| single_error("taken", json!(true)));
        self.username.set_errors_by(errors, self.source.clone())?;
        if !outstanding {
            self.username.mark_pending_by(false, self.source.clone())?;
        }
        self.username.mark_async_validation_complete(&self.source)
    }

    /// Mark the form submitted and return its enabled value when valid
    pub fn submit(&self) -> ControlResult<Option<Value>> {
        self.form.mark_submitted(true)?;
        self.form.mark_touched(true)?;
        Ok(self.form.valid().then(|| self.form.enabled_value()))
    }
}

/// Observed statuses of one sign-up run
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub status_while_checking: ControlStatus,
    pub final_status: ControlStatus,
    pub submitted: Option<Value>,
}

/// Fill the form, answer the uniqueness check and submit
pub fn run_signup(username_taken: bool) -> ControlResult<SignupOutcome> {
    let signup = SignupForm::new()?;
    signup.username.set_value(json!("ada"))?;
    signup.password.set_value(json!("correct horse"))?;
    signup.tags.push(FormControl::new(json!("rust")))?;
    let status_while_checking = signup.form.status();

    signup.resolve_check(username_taken)?;
    let final_status = signup.form.status();
    let submitted = signup.submit()?;
    Ok(SignupOutcome {
        status_while_checking,
        final_status,
        submitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::EventRecorder;
    use forma_controls::ValidationPhase;
    use forma_core::Prop;

    #[test]
    fn test_signup_happy_path() {
        let outcome = run_signup(false).unwrap();
        assert_eq!(outcome.status_while_checking, ControlStatus::Pending);
        assert_eq!(outcome.final_status, ControlStatus::Valid);
        assert_eq!(
            outcome.submitted,
            Some(json!({"username": "ada", "password": "correct horse", "tags": ["rust"]}))
        );
    }

    #[test]
    fn test_signup_taken_username() {
        let outcome = run_signup(true).unwrap();
        assert_eq!(outcome.final_status, ControlStatus::Invalid);
        assert!(outcome.submitted.is_none());
    }

    #[test]
    fn test_empty_form_is_invalid() {
        let signup = SignupForm::new().unwrap();
        assert_eq!(signup.form.status(), ControlStatus::Invalid);
        let errors = signup.form.errors().unwrap();
        assert!(errors.contains_key("required"));
        assert!(signup.submit().unwrap().is_none());
        assert!(signup.form.submitted());
        assert!(signup.form.touched());
    }

    #[test]
    fn test_uniqueness_round_blocks_completion() {
        let signup = SignupForm::new().unwrap();
        let recorder = EventRecorder::attach(&signup.username);

        signup.username.set_value(json!("grace")).unwrap();
        assert_eq!(signup.pending_checks(), vec![json!("grace")]);
        assert_eq!(signup.username.validation_phase(), ValidationPhase::AwaitingAsync);
        assert_eq!(recorder.count("ValidationComplete"), 0);

        signup.resolve_check(false).unwrap();
        assert_eq!(signup.username.validation_phase(), ValidationPhase::Idle);
        assert_eq!(recorder.count("ValidationComplete"), 1);
        assert!(!signup.username.pending());
    }

    #[test]
    fn test_disabled_field_is_left_out_of_submission() {
        let signup = SignupForm::new().unwrap();
        signup.username.set_value(json!("lin")).unwrap();
        signup.resolve_check(false).unwrap();
        signup.password.set_value(json!("long enough")).unwrap();
        signup.tags.mark_disabled(true).unwrap();

        assert_eq!(
            signup.submit().unwrap(),
            Some(json!({"username": "lin", "password": "long enough"}))
        );
    }

    #[test]
    fn test_form_value_push_reaches_fields() {
        let signup = SignupForm::new().unwrap();
        signup.tags.push(FormControl::new(json!("a"))).unwrap();
        let recorder = EventRecorder::attach(&signup.form);

        signup
            .form
            .set_value(json!({"username": "kay", "password": "12345678", "tags": ["b"]}))
            .unwrap();
        assert_eq!(signup.password.value(), json!("12345678"));
        assert_eq!(signup.tags.control(0).unwrap().value(), json!("b"));
        assert_eq!(signup.pending_checks(), vec![json!("kay")]);
        assert!(!recorder.touching(Prop::Value).is_empty());
    }
}
