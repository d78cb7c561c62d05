//! Control Tree Fuzzer - Randomized mutation of nested containers
//!
//! Builds a random tree of groups, arrays and leaves, applies random
//! mutations through the public API and checks after every step that each
//! container still agrees with its children:
//! - value and enabled value are the aggregate of the children
//! - every child reports the container as its parent
//! - array keys are contiguous
//! - child errors and status are consistent

use forma_controls::{Control, ControlKind, FormArray, FormControl, FormGroup};
use forma_core::{single_error, ControlKey, ControlResult, ControlStatus, Flag};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Containers directly under the root
    pub branch_count: usize,
    /// Leaves per container
    pub leaf_count: usize,
    /// Number of mutations to apply
    pub op_count: usize,
    /// Probability that a branch holds a nested group
    pub nest_prob: f64,
    /// Probability that a mutation is structural (push/remove)
    pub structural_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            branch_count: 4,
            leaf_count: 3,
            op_count: 300,
            nest_prob: 0.3,
            structural_prob: 0.1,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            branch_count: 2,
            leaf_count: 2,
            op_count: 50,
            nest_prob: 0.0,
            structural_prob: 0.0,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            branch_count: 8,
            leaf_count: 5,
            op_count: 2000,
            nest_prob: 0.5,
            structural_prob: 0.2,
            seed: 42,
        }
    }
}

/// One random mutation
#[derive(Clone, Debug)]
pub enum FuzzOp {
    SetLeaf(usize, Value),
    Disable(usize, bool),
    Touch(usize, bool),
    SetErrors(usize, bool),
    SetContainer(usize),
    PatchRoot,
    ClearTouched,
    Push(usize),
    Remove(usize),
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub ops_applied: usize,
    /// Operations the API rejected
    pub op_errors: Vec<String>,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.op_errors.is_empty() && self.violations.is_empty()
    }
}

/// Control tree fuzzer
pub struct TreeFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    root: FormGroup,
}

fn walk(control: &Control, leaves: &mut Vec<Control>, containers: &mut Vec<Control>) {
    if control.is_container() {
        containers.push(control.clone());
        for child in control.controls_store().controls() {
            walk(child, leaves, containers);
        }
    } else {
        leaves.push(control.clone());
    }
}

impl TreeFuzzer {
    /// Create a new fuzzer and its tree
    pub fn new(config: FuzzerConfig) -> ControlResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut branches: Vec<(String, Control)> = Vec::new();
        for b in 0..config.branch_count {
            let leaves: Vec<FormControl> = (0..config.leaf_count)
                .map(|_| FormControl::new(Self::scalar(&mut rng)))
                .collect();
            let branch: Control = if rng.gen_bool(0.5) {
                FormArray::new(leaves)?.into()
            } else {
                let mut children: Vec<(String, Control)> = leaves
                    .into_iter()
                    .enumerate()
                    .map(|(i, leaf)| (format!("f{}", i), leaf.into()))
                    .collect();
                if rng.gen_bool(config.nest_prob) {
                    let nested = FormGroup::new([("inner", FormControl::new(Self::scalar(&mut rng)))])?;
                    children.push(("nested".to_string(), nested.into()));
                }
                FormGroup::new(children)?.into()
            };
            branches.push((format!("b{}", b), branch));
        }
        let root = FormGroup::new(branches)?;
        Ok(TreeFuzzer { config, rng, root })
    }

    pub fn root(&self) -> &FormGroup {
        &self.root
    }

    fn scalar(rng: &mut StdRng) -> Value {
        if rng.gen_bool(0.5) {
            json!(rng.gen_range(0..100))
        } else {
            let len = rng.gen_range(0..6);
            Value::String((0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect())
        }
    }

    /// A value with the same shape as `control`'s current value
    fn shaped_value(&mut self, control: &Control) -> Value {
        match control.kind() {
            ControlKind::Leaf => Self::scalar(&mut self.rng),
            ControlKind::Array => {
                let children: Vec<Control> = control.controls_store().controls().cloned().collect();
                Value::Array(children.iter().map(|c| self.shaped_value(c)).collect())
            }
            ControlKind::Group => {
                let children: Vec<(ControlKey, Control)> = control
                    .controls_store()
                    .iter()
                    .map(|(k, c)| (k.clone(), c.clone()))
                    .collect();
                let mut map = Map::new();
                for (key, child) in children {
                    let value = self.shaped_value(&child);
                    map.insert(key.as_name(), value);
                }
                Value::Object(map)
            }
        }
    }

    fn tree(&self) -> (Vec<Control>, Vec<Control>) {
        let (mut leaves, mut containers) = (Vec::new(), Vec::new());
        walk(&self.root, &mut leaves, &mut containers);
        (leaves, containers)
    }

    fn generate_op(&mut self, leaves: usize, containers: usize) -> FuzzOp {
        if self.rng.gen_bool(self.config.structural_prob) && containers > 0 {
            let target = self.rng.gen_range(0..containers);
            return if self.rng.gen_bool(0.5) {
                FuzzOp::Push(target)
            } else {
                FuzzOp::Remove(target)
            };
        }
        let leaf = if leaves == 0 { 0 } else { self.rng.gen_range(0..leaves) };
        match self.rng.gen_range(0..8) {
            0 | 1 => FuzzOp::SetLeaf(leaf, Self::scalar(&mut self.rng)),
            2 => FuzzOp::Disable(leaf, self.rng.gen_bool(0.3)),
            3 => FuzzOp::Touch(leaf, self.rng.gen_bool(0.5)),
            4 => FuzzOp::SetErrors(leaf, self.rng.gen_bool(0.5)),
            5 => FuzzOp::SetContainer(self.rng.gen_range(0..containers.max(1))),
            6 => FuzzOp::PatchRoot,
            _ => FuzzOp::ClearTouched,
        }
    }

    fn apply(&mut self, op: &FuzzOp, leaves: &[Control], containers: &[Control]) -> ControlResult<()> {
        match op {
            FuzzOp::SetLeaf(i, value) => {
                if let Some(leaf) = leaves.get(*i) {
                    leaf.set_value(value.clone())?;
                }
            }
            FuzzOp::Disable(i, on) => {
                if let Some(leaf) = leaves.get(*i) {
                    leaf.mark_disabled(*on)?;
                }
            }
            FuzzOp::Touch(i, on) => {
                if let Some(leaf) = leaves.get(*i) {
                    leaf.mark_touched(*on)?;
                }
            }
            FuzzOp::SetErrors(i, on) => {
                if let Some(leaf) = leaves.get(*i) {
                    leaf.set_errors(on.then(|| single_error("fuzz", json!(true))))?;
                }
            }
            FuzzOp::SetContainer(i) => {
                if let Some(container) = containers.get(*i) {
                    let value = self.shaped_value(container);
                    container.set_value(value)?;
                }
            }
            FuzzOp::PatchRoot => {
                let root: Control = self.root.clone().into();
                if let Some((key, child)) = root.controls_store().iter().next().map(|(k, c)| (k.clone(), c.clone())) {
                    let value = self.shaped_value(&child);
                    let mut patch = Map::new();
                    patch.insert(key.as_name(), value);
                    self.root.patch_value(Value::Object(patch))?;
                }
            }
            FuzzOp::ClearTouched => {
                self.root.mark_touched(false)?;
            }
            FuzzOp::Push(i) => {
                if let Some(Ok(array)) = containers.get(*i).cloned().map(FormArray::try_from) {
                    let leaf = FormControl::new(Self::scalar(&mut self.rng));
                    array.push(leaf)?;
                }
            }
            FuzzOp::Remove(i) => {
                if let Some(Ok(array)) = containers.get(*i).cloned().map(FormArray::try_from) {
                    if array.size() > 1 {
                        let index = self.rng.gen_range(0..array.size());
                        array.remove_control(index)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::default();
        result.violations.extend(self.check_invariants());

        for step in 0..self.config.op_count {
            let (leaves, containers) = self.tree();
            let op = self.generate_op(leaves.len(), containers.len());
            if let Err(err) = self.apply(&op, &leaves, &containers) {
                result.op_errors.push(format!("step {} {:?}: {}", step, op, err));
            }
            result.ops_applied += 1;

            let violations = self.check_invariants();
            if !violations.is_empty() {
                result
                    .violations
                    .extend(violations.into_iter().map(|v| format!("step {} {:?}: {}", step, op, v)));
                break;
            }
        }
        result
    }

    /// Check every container in the tree
    pub fn check_invariants(&self) -> Vec<String> {
        let (_, containers) = self.tree();
        containers.iter().flat_map(check_container).collect()
    }
}

/// Aggregation invariants of one container
pub fn check_container(container: &Control) -> Vec<String> {
    let mut violations = Vec::new();
    let store = container.controls_store();
    let id = container.id();

    for child in store.controls() {
        if child.parent().as_ref() != Some(id) {
            violations.push(format!("{}: child {} has parent {:?}", id, child.id(), child.parent()));
        }
    }

    let (value, enabled_value) = match container.kind() {
        ControlKind::Array => {
            let expected: Vec<ControlKey> = (0..store.len()).map(ControlKey::Index).collect();
            if store.keys() != expected {
                violations.push(format!("{}: array keys {:?}", id, store.keys()));
            }
            (
                Value::Array(store.controls().map(Control::value).collect()),
                Value::Array(store.controls().filter(|c| c.enabled()).map(Control::value).collect()),
            )
        }
        _ => (
            Value::Object(store.iter().map(|(k, c)| (k.as_name(), c.value())).collect()),
            Value::Object(
                store
                    .iter()
                    .filter(|(_, c)| c.enabled())
                    .map(|(k, c)| (k.as_name(), c.value()))
                    .collect(),
            ),
        ),
    };
    if container.value() != value {
        violations.push(format!("{}: value {} != children {}", id, container.value(), value));
    }
    if container.enabled_value() != enabled_value {
        violations.push(format!(
            "{}: enabled value {} != children {}",
            id,
            container.enabled_value(),
            enabled_value
        ));
    }

    let any_child_errors = store.controls().any(|c| c.enabled() && c.errors().is_some());
    if container.children_errors().is_some() != any_child_errors {
        violations.push(format!("{}: children errors {:?}", id, container.children_errors()));
    }

    let all_disabled = !store.is_empty() && store.controls().all(Control::disabled);
    if container.quantifier(Flag::Disabled).children != all_disabled {
        violations.push(format!("{}: disabled quantifier out of date", id));
    }

    let expected = ControlStatus::derive(container.disabled(), container.pending(), container.errors().is_some());
    if container.status() != expected {
        violations.push(format!("{}: status {:?} expected {:?}", id, container.status(), expected));
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fuzzer_light() {
        let mut fuzzer = TreeFuzzer::new(FuzzerConfig::light()).unwrap();
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result);
        assert_eq!(result.ops_applied, 50);
    }

    #[test]
    fn test_fuzzer_default() {
        crate::logging::init_test_logging();
        let mut fuzzer = TreeFuzzer::new(FuzzerConfig::default()).unwrap();
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result);
    }

    #[test]
    #[ignore]
    fn test_fuzzer_heavy() {
        crate::logging::init_test_logging();
        let mut fuzzer = TreeFuzzer::new(FuzzerConfig::heavy()).unwrap();
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result);
    }

    #[test]
    fn test_fuzzer_is_deterministic() {
        let a = TreeFuzzer::new(FuzzerConfig::light()).unwrap();
        let b = TreeFuzzer::new(FuzzerConfig::light()).unwrap();
        assert_eq!(a.root().value(), b.root().value());
    }

    #[test]
    fn test_check_container_reports_nothing_for_fresh_tree() {
        let fuzzer = TreeFuzzer::new(FuzzerConfig::default()).unwrap();
        assert!(fuzzer.check_invariants().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_array_value_tracks_children(values in prop::collection::vec(0i64..1000, 0..8)) {
            let array = FormArray::new(values.iter().map(|v| FormControl::new(json!(v)))).unwrap();
            prop_assert_eq!(array.value(), json!(values));

            let reversed: Vec<i64> = values.iter().rev().copied().collect();
            array.set_value(json!(reversed)).unwrap();
            for (i, v) in reversed.iter().enumerate() {
                prop_assert_eq!(array.control(i).unwrap().value(), json!(v));
            }
            prop_assert!(check_container(&array).is_empty());
        }

        #[test]
        fn prop_enabled_value_skips_disabled(mask in prop::collection::vec(any::<bool>(), 1..8)) {
            let group = FormGroup::new(
                mask.iter().enumerate().map(|(i, _)| (format!("k{}", i), FormControl::new(json!(i)))),
            )
            .unwrap();
            for (i, disabled) in mask.iter().enumerate() {
                if *disabled {
                    group.control(&format!("k{}", i)).unwrap().mark_disabled(true).unwrap();
                }
            }

            let enabled = group.enabled_value();
            let keys: Vec<String> = enabled.as_object().unwrap().keys().cloned().collect();
            let expected: Vec<String> = mask
                .iter()
                .enumerate()
                .filter(|(_, d)| !**d)
                .map(|(i, _)| format!("k{}", i))
                .collect();
            let mut keys_sorted = keys.clone();
            keys_sorted.sort();
            let mut expected_sorted = expected.clone();
            expected_sorted.sort();
            prop_assert_eq!(keys_sorted, expected_sorted);
            prop_assert_eq!(group.disabled(), mask.iter().all(|d| *d));
            prop_assert!(check_container(&group).is_empty());
        }

        #[test]
        fn prop_patch_only_touches_named_keys(patch_first in any::<bool>(), value in 0i64..100) {
            let group = FormGroup::new([
                ("a", FormControl::new(json!(-1))),
                ("b", FormControl::new(json!(-2))),
            ])
            .unwrap();
            let key = if patch_first { "a" } else { "b" };
            let other = if patch_first { "b" } else { "a" };
            let before = group.control(other).unwrap().value();

            group.patch_value(json!({ key: value })).unwrap();
            prop_assert_eq!(group.control(key).unwrap().value(), json!(value));
            prop_assert_eq!(group.control(other).unwrap().value(), before);
        }
    }
}
