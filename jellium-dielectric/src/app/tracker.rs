use crate::inner_loop::{LoopDiagnostics, Solution, StaticResponse};
use crate::state::StatePoint;
use jellium_mesher::{Discretisation, WaveVectorGrid};

/// The tracker owns every array of the calculation and lends borrows to the
/// solver components; worker routines never allocate result storage of their
/// own.
pub(crate) struct Tracker {
    grid: WaveVectorGrid<f64>,
    state: StatePoint,
    response: StaticResponse,
    solution: Solution,
    diagnostics: Option<LoopDiagnostics>,
    /// The variational free parameter, when an outer loop produced one
    pub(crate) alpha: Option<f64>,
}

pub(crate) struct TrackerBuilder<RefGrid, RefState, RefResponse> {
    grid: RefGrid,
    state: RefState,
    response: RefResponse,
}

impl TrackerBuilder<(), (), ()> {
    pub(crate) fn new() -> Self {
        Self {
            grid: (),
            state: (),
            response: (),
        }
    }
}

impl<RefGrid, RefState, RefResponse> TrackerBuilder<RefGrid, RefState, RefResponse> {
    pub(crate) fn with_grid(
        self,
        grid: WaveVectorGrid<f64>,
    ) -> TrackerBuilder<WaveVectorGrid<f64>, RefState, RefResponse> {
        TrackerBuilder {
            grid,
            state: self.state,
            response: self.response,
        }
    }

    pub(crate) fn with_state(
        self,
        state: StatePoint,
    ) -> TrackerBuilder<RefGrid, StatePoint, RefResponse> {
        TrackerBuilder {
            grid: self.grid,
            state,
            response: self.response,
        }
    }

    pub(crate) fn with_response(
        self,
        response: StaticResponse,
    ) -> TrackerBuilder<RefGrid, RefState, StaticResponse> {
        TrackerBuilder {
            grid: self.grid,
            state: self.state,
            response,
        }
    }
}

impl TrackerBuilder<WaveVectorGrid<f64>, StatePoint, StaticResponse> {
    pub(crate) fn build(self, nl: Option<usize>) -> Tracker {
        let solution = Solution::sized(self.grid.num_points(), nl);
        Tracker {
            grid: self.grid,
            state: self.state,
            response: self.response,
            solution,
            diagnostics: None,
            alpha: None,
        }
    }
}

impl Tracker {
    pub(crate) fn grid(&self) -> &WaveVectorGrid<f64> {
        &self.grid
    }

    pub(crate) fn state(&self) -> &StatePoint {
        &self.state
    }

    pub(crate) fn response(&self) -> &StaticResponse {
        &self.response
    }

    pub(crate) fn solution(&self) -> &Solution {
        &self.solution
    }

    pub(crate) fn solution_mut(&mut self) -> &mut Solution {
        &mut self.solution
    }

    pub(crate) fn diagnostics(&self) -> Option<&LoopDiagnostics> {
        self.diagnostics.as_ref()
    }

    pub(crate) fn record_diagnostics(&mut self, diagnostics: LoopDiagnostics) {
        self.diagnostics = Some(diagnostics);
    }

    pub(crate) fn update_solution(&mut self, solution: Solution) {
        let _ = std::mem::replace(&mut self.solution, solution);
    }
}
