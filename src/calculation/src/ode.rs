//! Split-step integration over uniformly sampled axial grids.
//!
//! The synchronous-particle equations are stepped one field sample at a
//! time: a *kick* updates the momentum-like variable from the local force,
//! then a *drift* advances the position-like variable using the kicked
//! value. This is the symplectic (semi-implicit) Euler scheme; it is first
//! order like forward Euler but keeps phase-space area bounded on
//! oscillatory systems.

/// A system advanced sample by sample along a uniform grid.
pub trait SplitStepSystem {
    /// Integration state.
    type State: Clone + Copy;

    /// Updates the momentum-like part of `state` at sample `index`.
    fn kick(&self, index: usize, state: &mut Self::State, step: f64);

    /// Updates the position-like part of `state` after the kick.
    fn drift(&self, index: usize, state: &mut Self::State, step: f64);
}

/// Fixed-step symplectic Euler integrator.
pub struct SplitStepIntegrator;

impl SplitStepIntegrator {
    /// Runs `samples` steps of size `step` from `state0`.
    ///
    /// Entry `i` of the result is the state *at* sample `i`, before that
    /// sample's kick; the result always has `samples` entries, the state after
    /// the last step is not recorded.
    pub fn integrate<S: SplitStepSystem>(
        system: &S,
        state0: S::State,
        samples: usize,
        step: f64,
    ) -> Vec<S::State> {
        let mut states = Vec::with_capacity(samples);
        let mut state = state0;
        for i in 0..samples {
            states.push(state);
            system.kick(i, &mut state, step);
            system.drift(i, &mut state, step);
        }
        states
    }

    /// Single step at sample `index`.
    #[inline(always)]
    pub fn step<S: SplitStepSystem>(system: &S, index: usize, state: S::State, step: f64) -> S::State {
        let mut next = state;
        system.kick(index, &mut next, step);
        system.drift(index, &mut next, step);
        next
    }
}
