//! Workspace lifecycle states.
//!
//! A [`State`] pairs the status a workspace sits in while work is pending
//! (`processing`) with the status it moves to once every required
//! transaction has been applied (`finished`). New lifecycle phases are added
//! by registering another `State`; the executor and reconciler are unaware of
//! the concrete phases.

use crate::error::{OrchestratorError, Result};
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StateId {
    Reserving,
    Reserved,
    WaitingForCredential,
    Provisioning,
    Provisioned,
    Failed,
}

impl StateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateId::Reserving => "reserving",
            StateId::Reserved => "reserved",
            StateId::WaitingForCredential => "waiting_for_credential",
            StateId::Provisioning => "provisioning",
            StateId::Provisioned => "provisioned",
            StateId::Failed => "failed",
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub processing: StateId,
    pub finished: StateId,
    requirements: Vec<TransactionId>,
}

impl State {
    pub fn new(
        processing: StateId,
        finished: StateId,
        requirements: impl IntoIterator<Item = TransactionId>,
    ) -> Self {
        let mut seen = Vec::new();
        for id in requirements {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }

        Self {
            processing,
            finished,
            requirements: seen,
        }
    }

    /// Transactions that must all be applied before the workspace may leave
    /// the processing status. Order is the declaration order, duplicates removed.
    pub fn requirements(&self) -> &[TransactionId] {
        &self.requirements
    }
}

/// Lookup from a processing status to the state that drives it.
#[derive(Debug, Clone, Default)]
pub struct StateCatalog {
    states: HashMap<StateId, State>,
}

impl StateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lifecycle every workspace goes through:
    /// reserving → reserved → (claim) → waiting_for_credential → provisioning → provisioned.
    pub fn standard() -> Result<Self> {
        use TransactionId::*;

        let reserve = [
            CreateMasterCredential,
            CreateServiceAccountRoles,
            CreateNamespace,
            CreateHelmRelease,
        ];

        Self::from_states([
            State::new(StateId::Reserving, StateId::Reserved, reserve),
            State::new(
                StateId::WaitingForCredential,
                StateId::Provisioning,
                [EnsureCredentialOnboarded],
            ),
            State::new(
                StateId::Provisioning,
                StateId::Provisioned,
                reserve.into_iter().chain([
                    EnsureBootstrapInputFinished,
                    EnsureDiscoveryFinished,
                    RunAnalyticsJob,
                ]),
            ),
        ])
    }

    /// Register every state of `states`, stopping at the first rejected one.
    pub fn from_states(states: impl IntoIterator<Item = State>) -> Result<Self> {
        let mut catalog = Self::new();
        for state in states {
            catalog.register(state)?;
        }
        Ok(catalog)
    }

    /// Register a state. Two states may not claim the same processing status,
    /// and a terminal `Failed` status can never be a processing status.
    pub fn register(&mut self, state: State) -> Result<()> {
        if state.processing == state.finished {
            return Err(OrchestratorError::InvalidState(format!(
                "state {} finishes in itself",
                state.processing
            )));
        }
        if state.processing == StateId::Failed {
            return Err(OrchestratorError::InvalidState(
                "failed is terminal and cannot be processed".to_string(),
            ));
        }
        if self.states.contains_key(&state.processing) {
            return Err(OrchestratorError::InvalidState(format!(
                "state {} is already registered",
                state.processing
            )));
        }

        self.states.insert(state.processing, state);
        Ok(())
    }

    pub fn get_state(&self, id: StateId) -> Result<&State> {
        self.states
            .get(&id)
            .ok_or(OrchestratorError::StateNotFound(id))
    }

    pub fn is_processing(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    /// Every registered processing status, sorted for stable queries.
    pub fn processing_states(&self) -> Vec<StateId> {
        let mut ids: Vec<_> = self.states.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_states() {
        let catalog = StateCatalog::standard().unwrap();

        assert_eq!(
            catalog.processing_states(),
            vec![
                StateId::Reserving,
                StateId::WaitingForCredential,
                StateId::Provisioning
            ]
        );

        let reserving = catalog.get_state(StateId::Reserving).unwrap();
        assert_eq!(reserving.finished, StateId::Reserved);
        assert_eq!(reserving.requirements().len(), 4);

        let provisioning = catalog.get_state(StateId::Provisioning).unwrap();
        assert_eq!(provisioning.finished, StateId::Provisioned);
        assert!(provisioning
            .requirements()
            .contains(&TransactionId::RunAnalyticsJob));
    }

    #[test]
    fn test_terminal_statuses_are_not_processing() {
        let catalog = StateCatalog::standard().unwrap();

        for id in [StateId::Reserved, StateId::Provisioned, StateId::Failed] {
            assert!(!catalog.is_processing(id));
            assert!(matches!(
                catalog.get_state(id),
                Err(OrchestratorError::StateNotFound(_))
            ));
        }
    }

    #[test]
    fn test_catalog_from_clashing_states_is_an_error() {
        let result = StateCatalog::from_states([
            State::new(StateId::Reserving, StateId::Reserved, []),
            State::new(StateId::Provisioning, StateId::Provisioned, []),
            State::new(StateId::Reserving, StateId::Provisioned, []),
        ]);

        match result {
            Err(OrchestratorError::InvalidState(message)) => {
                assert!(message.contains("already registered"))
            }
            Ok(_) => panic!("Expected the clashing catalog to be rejected"),
            Err(other) => panic!("Expected invalid state, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_processing_status_is_rejected() {
        let mut catalog = StateCatalog::new();
        catalog
            .register(State::new(StateId::Reserving, StateId::Reserved, []))
            .unwrap();

        let err = catalog
            .register(State::new(StateId::Reserving, StateId::Provisioned, []))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidState(_)));
    }

    #[test]
    fn test_failed_cannot_be_processed() {
        let mut catalog = StateCatalog::new();
        assert!(catalog
            .register(State::new(StateId::Failed, StateId::Reserving, []))
            .is_err());
        assert!(catalog
            .register(State::new(StateId::Reserved, StateId::Reserved, []))
            .is_err());
    }

    #[test]
    fn test_requirements_are_deduplicated_in_order() {
        use TransactionId::*;
        let state = State::new(
            StateId::Provisioning,
            StateId::Provisioned,
            [CreateNamespace, CreateMasterCredential, CreateNamespace],
        );
        assert_eq!(
            state.requirements(),
            &[CreateNamespace, CreateMasterCredential]
        );
    }
}
