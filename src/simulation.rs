use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use ndarray::{s, Array4, Zip};
use tracing::{debug, info};

use crate::boundary::{Cpml, DecayParams, ExpDecay, FreeSurface, PmlParams};
use crate::config::{Config, DoubleCoupleConfig, OutputConfig, RickerConfig, StationConfig};
use crate::diagnostics::{Diagnostics, DiagnosticsOutput};
use crate::error::{PropagationError, PropagationResult, TransportError};
use crate::grid::{Grid, Subdomain};
use crate::halo::HaloExchange;
use crate::integrator::{Integrator, StageScratch};
use crate::medium::Medium;
use crate::scheme::{self, FreeSurfaceMode, Gradients, SchemeKind, SpatialScheme, UpwindBias};
use crate::source::{
    DoubleCoupleSource, MultiSource, MultiSourceData, RickerPointSource, SourceTerm,
};
use crate::transport::{ThreadTransport, Transport};
use crate::wavefield::{Wavefield, WSIZE};

/// Everything a rank needs to propagate, identical on every rank.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub dt: f64,               // Time step (seconds)
    pub nt: usize,             // Number of time steps
    pub scheme: SchemeKind,
    pub free_surface: bool,
    pub pml: Option<PmlParams>,
    pub decay: Option<DecayParams>,
    /// Reference P velocity for the PML profiles; each rank's medium
    /// maximum when unset.
    pub vp_max: Option<f64>,
    pub ricker: Option<RickerConfig>,
    pub double_couple: Option<DoubleCoupleConfig>,
    pub output: OutputConfig,
    pub stations: Vec<StationConfig>,
    pub report_period: usize, // Steps between progress reports
}

impl SimulationParams {
    /// Bare parameters: reflecting boundaries, no sources, default output.
    pub fn new(dt: f64, nt: usize, scheme: SchemeKind) -> Self {
        Self {
            dt,
            nt,
            scheme,
            free_surface: false,
            pml: None,
            decay: None,
            vp_max: None,
            ricker: None,
            double_couple: None,
            output: OutputConfig::default(),
            stations: Vec::new(),
            report_period: 10,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            dt: config.dt(),
            nt: config.nt(),
            scheme: config.scheme.kind,
            free_surface: config.boundary.free_surface,
            pml: config.pml_params(),
            decay: config.decay_params(),
            vp_max: Some(config.medium.vp),
            ricker: config.source.ricker.clone(),
            double_couple: config.source.double_couple.clone(),
            output: config.output.clone(),
            stations: config.stations.clone(),
            report_period: 10,
        }
    }

    pub fn total_time(&self) -> f64 {
        self.nt as f64 * self.dt
    }
}

/// Rank identity and wall-clock start.
#[derive(Debug, Clone)]
pub struct RankContext {
    pub rank: usize,
    pub size: usize,
    started: Instant,
}

impl RankContext {
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            started: Instant::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Seconds since the rank started.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// What a rank hands back after the loop.
#[derive(Debug, Clone)]
pub struct RankOutput {
    pub sub: Subdomain,
    pub steps: usize,
    pub wavefield: Wavefield,
    pub displacement: Option<Array4<f64>>,
    pub diagnostics: DiagnosticsOutput,
}

/// Per-rank propagation state.
pub struct Simulation<'a, T: Transport + ?Sized> {
    ctx: RankContext,
    sub: Subdomain,
    params: &'a SimulationParams,
    transport: &'a T,
    medium: Medium,
    halo: HaloExchange,
    scheme: Box<dyn SpatialScheme>,
    integrator: Integrator,
    wavefield: Wavefield,
    scratch: StageScratch,
    rates: Array4<f64>,
    grads: Gradients,
    free_surface: Option<FreeSurface>,
    cpml: Option<Cpml>,
    decay: Option<ExpDecay>,
    sources: Vec<Box<dyn SourceTerm>>,
    diagnostics: Diagnostics,
    displacement: Option<Array4<f64>>,
    current_timestep: usize,
}

impl<'a, T: Transport + ?Sized> Simulation<'a, T> {
    pub fn new(
        grid: &Grid,
        medium: Medium,
        params: &'a SimulationParams,
        transport: &'a T,
        multi: Option<&MultiSourceData>,
    ) -> PropagationResult<Self> {
        if transport.size() != grid.rank_count() {
            return Err(PropagationError::Config(format!(
                "transport spans {} ranks, grid decomposition needs {}",
                transport.size(),
                grid.rank_count()
            )));
        }
        if params.dt <= 0.0 {
            return Err(PropagationError::Config(format!("dt must be positive, got {}", params.dt)));
        }
        let ctx = RankContext::new(transport.rank(), transport.size());
        let sub = grid.subdomain(ctx.rank);
        medium.validate(&sub)?;

        let halo = HaloExchange::new(&sub)?;
        let scheme = scheme::build(params.scheme, sub.padded());
        let integrator = scheme.integrator();
        let wavefield = Wavefield::for_subdomain(&sub);
        let scratch = StageScratch::new(integrator, wavefield.data.dim());
        let rates = Array4::zeros(wavefield.data.dim());
        let grads = Gradients::new(scheme.quantities(), sub.padded());

        let free_surface = if params.free_surface {
            FreeSurface::new(&sub)
        } else {
            None
        };
        let cpml = match &params.pml {
            Some(pml) => {
                let vp_max = params.vp_max.unwrap_or_else(|| medium.max_vp());
                Cpml::new(&sub, pml, vp_max, params.free_surface, scheme.quantities(), integrator)?
            }
            None => None,
        };
        let decay = params
            .decay
            .as_ref()
            .map(|d| ExpDecay::new(grid, &sub, d, params.free_surface));

        let sources = build_sources(grid, &sub, params, multi, &medium)?;

        let diagnostics = Diagnostics::new(
            &sub,
            &params.output,
            &params.stations,
            params.nt,
            params.dt,
            params.free_surface,
        );
        let displacement = params.output.displacement.then(|| {
            let p = sub.padded();
            Array4::zeros((3, p[0], p[1], p[2]))
        });

        debug!(
            rank = ctx.rank,
            extent = ?sub.extent,
            scheme = scheme.name(),
            free_surface = free_surface.is_some(),
            cpml = cpml.is_some(),
            sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "rank initialised"
        );

        Ok(Self {
            ctx,
            sub,
            params,
            transport,
            medium,
            halo,
            scheme,
            integrator,
            wavefield,
            scratch,
            rates,
            grads,
            free_surface,
            cpml,
            decay,
            sources,
            diagnostics,
            displacement,
            current_timestep: 0,
        })
    }

    pub fn current_time(&self) -> f64 {
        self.current_timestep as f64 * self.params.dt
    }

    pub fn is_finished(&self) -> bool {
        self.current_timestep >= self.params.nt
    }

    pub fn wavefield(&self) -> &Wavefield {
        &self.wavefield
    }

    /// Advances one full timestep: source injection, every integrator
    /// stage, per-step corrections and diagnostics.
    pub fn step(&mut self) -> PropagationResult<()> {
        let it = self.current_timestep;
        let dt = self.params.dt;
        let step_started = Instant::now();

        for source in &self.sources {
            source.inject(it, 0, &mut self.wavefield, &self.medium);
        }

        let per_stage = self.scheme.free_surface_mode() == FreeSurfaceMode::PerStage;
        let mut bias = UpwindBias::for_timestep(it);
        for stage in 0..self.integrator.stages() {
            self.transport.barrier()?;
            self.halo.exchange(self.transport, &mut self.wavefield.data)?;

            let surface = self.free_surface.as_ref().filter(|_| per_stage);
            if let Some(fs) = surface {
                fs.prepare(&mut self.wavefield);
            }
            self.scheme
                .differentiate(&self.wavefield, &self.medium, bias, self.sub.dh, &mut self.grads);
            if let Some(fs) = surface {
                fs.correct(&self.wavefield, &self.medium, &mut self.grads);
            }
            if let Some(cpml) = &mut self.cpml {
                cpml.apply(&mut self.grads);
                match (&self.free_surface, per_stage) {
                    (Some(fs), true) => fs.correct_in_pml(&self.medium, &mut self.grads, cpml),
                    (Some(fs), false) => {
                        fs.correct_flux_in_pml(&self.medium, &mut self.grads, cpml)
                    }
                    (None, _) => {}
                }
            }
            self.scheme
                .assemble(&self.grads, &self.medium, &self.sub, &mut self.rates);

            self.integrator
                .combine(stage, &mut self.wavefield.data, &mut self.scratch, &self.rates, dt);
            if let Some(cpml) = &mut self.cpml {
                cpml.combine(stage, dt);
            }
            bias = bias.reversed();
        }

        if !per_stage {
            if let Some(fs) = &self.free_surface {
                fs.characteristic_correction(&mut self.wavefield, &self.medium);
            }
        }
        if let Some(decay) = &self.decay {
            decay.apply(&mut self.wavefield);
        }
        if let Some(u) = &mut self.displacement {
            integrate_displacement(u, &self.wavefield, &self.sub, dt);
        }
        self.diagnostics
            .sample(it, &self.wavefield, self.displacement.as_ref());

        self.transport.barrier()?;
        self.current_timestep += 1;

        if self.ctx.is_root() && self.current_timestep % self.params.report_period.max(1) == 0 {
            info!(
                "Step {}/{} (t={:.4}s): {:.3} ms/step, {:.2} s elapsed",
                self.current_timestep,
                self.params.nt,
                self.current_time(),
                step_started.elapsed().as_secs_f64() * 1e3,
                self.ctx.elapsed()
            );
        }
        Ok(())
    }

    /// Runs every remaining timestep and hands back the rank's buffers.
    pub fn run(mut self) -> PropagationResult<RankOutput> {
        if self.ctx.is_root() {
            info!(
                ranks = self.ctx.size,
                nt = self.params.nt,
                dt = self.params.dt,
                scheme = self.scheme.name(),
                "Starting propagation ({:.3} s simulated)",
                self.params.total_time()
            );
        }

        while !self.is_finished() {
            self.step()?;
        }

        if self.ctx.is_root() {
            info!("Propagation complete in {:.2} s", self.ctx.elapsed());
        }
        Ok(RankOutput {
            sub: self.sub,
            steps: self.current_timestep,
            wavefield: self.wavefield,
            displacement: self.displacement,
            diagnostics: self.diagnostics.finish(),
        })
    }
}

/// Source terms in injection order: Ricker, double couple, distributed.
fn build_sources(
    grid: &Grid,
    sub: &Subdomain,
    params: &SimulationParams,
    multi: Option<&MultiSourceData>,
    medium: &Medium,
) -> PropagationResult<Vec<Box<dyn SourceTerm>>> {
    let mut sources: Vec<Box<dyn SourceTerm>> = Vec::new();
    if let Some(ricker) = &params.ricker {
        sources.push(Box::new(RickerPointSource::new(sub, ricker, params.dt)));
    }
    if let Some(dc) = &params.double_couple {
        sources.push(Box::new(DoubleCoupleSource::new(sub, dc, params.dt)));
    }
    if let Some(data) = multi {
        data.validate(grid, params.nt)?;
        let flux = params.scheme == SchemeKind::AlternatingFlux;
        let multi = MultiSource::new(grid, sub, data, medium, params.dt, params.free_surface, flux);
        if !multi.is_empty() {
            sources.push(Box::new(multi));
        }
    }
    Ok(sources)
}

/// `u += dt v` over the interior.
fn integrate_displacement(u: &mut Array4<f64>, w: &Wavefield, sub: &Subdomain, dt: f64) {
    let (x, y, z) = (sub.interior(0), sub.interior(1), sub.interior(2));
    let velocity = w.data.slice(s![0..3, x.clone(), y.clone(), z.clone()]);
    Zip::from(u.slice_mut(s![.., x, y, z]))
        .and(&velocity)
        .par_for_each(|u, &v| *u += dt * v);
}

/// Runs every rank of `grid` on its own thread over a `ThreadTransport`
/// mesh. `medium_for` builds each rank's medium tensor. A failing rank
/// aborts the others; the first root-cause error is returned.
pub fn run_ranks<F>(
    grid: &Grid,
    params: &SimulationParams,
    multi: Option<&MultiSourceData>,
    medium_for: F,
) -> PropagationResult<Vec<RankOutput>>
where
    F: Fn(&Subdomain) -> PropagationResult<Medium> + Sync,
{
    let transports = ThreadTransport::mesh(grid);
    let medium_for = &medium_for;
    let results: Vec<PropagationResult<RankOutput>> = thread::scope(|scope| {
        let handles: Vec<_> = transports
            .into_iter()
            .map(|transport| {
                scope.spawn(move || run_rank(grid, params, multi, medium_for, &transport))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or(Err(PropagationError::RankPanicked { rank }))
            })
            .collect()
    });

    let mut outputs = Vec::with_capacity(results.len());
    let mut aborted = None;
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(err @ PropagationError::Transport(TransportError::Aborted(_))) => {
                aborted.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    match aborted {
        Some(err) => Err(err),
        None => Ok(outputs),
    }
}

/// Runs one rank, raising the shared abort if it fails or panics.
pub fn run_rank<T, F>(
    grid: &Grid,
    params: &SimulationParams,
    multi: Option<&MultiSourceData>,
    medium_for: &F,
    transport: &T,
) -> PropagationResult<RankOutput>
where
    T: Transport + ?Sized,
    F: Fn(&Subdomain) -> PropagationResult<Medium>,
{
    let rank = transport.rank();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let medium = medium_for(&grid.subdomain(rank))?;
        Simulation::new(grid, medium, params, transport, multi)?.run()
    }));
    let result = outcome.unwrap_or(Err(PropagationError::RankPanicked { rank }));
    if let Err(err) = &result {
        if !matches!(err, PropagationError::Transport(TransportError::Aborted(_))) {
            transport.abort(&err.to_string());
        }
    }
    result
}

/// Global interior field `(WSIZE, nx, ny, nz)` assembled from every rank's
/// final wavefield.
pub fn gather_wavefield(grid: &Grid, outputs: &[RankOutput]) -> Array4<f64> {
    let mut global = Array4::zeros((WSIZE, grid.nx, grid.ny, grid.nz));
    for output in outputs {
        let sub = &output.sub;
        let [x0, y0, z0] = sub.start;
        let [nx, ny, nz] = sub.extent;
        global
            .slice_mut(s![.., x0..x0 + nx, y0..y0 + ny, z0..z0 + nz])
            .assign(&output.wavefield.interior(sub));
    }
    global
}
