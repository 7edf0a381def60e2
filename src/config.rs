use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use tracing::{info, warn};

use crate::boundary::{DecayParams, PmlParams};
use crate::grid::Grid;
use crate::scheme::SchemeKind;

/// Grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dh: f64,
}

impl GridConfig {
    fn validate(&self) -> Result<()> {
        if self.nx == 0 || self.ny == 0 || self.nz == 0 {
            return Err(anyhow!(
                "Grid dimensions must be positive (nx={}, ny={}, nz={})",
                self.nx,
                self.ny,
                self.nz
            ));
        }
        if self.dh <= 0.0 {
            return Err(anyhow!("Grid spacing must be positive, got dh={}", self.dh));
        }
        Ok(())
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    fn contains(&self, index: [usize; 3]) -> bool {
        index[0] < self.nx && index[1] < self.ny && index[2] < self.nz
    }
}

/// Rank decomposition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RanksConfig {
    #[serde(default = "default_ranks")]
    pub px: usize,
    #[serde(default = "default_ranks")]
    pub py: usize,
    #[serde(default = "default_ranks")]
    pub pz: usize,
}

fn default_ranks() -> usize {
    1
}

impl Default for RanksConfig {
    fn default() -> Self {
        RanksConfig { px: 1, py: 1, pz: 1 }
    }
}

impl RanksConfig {
    fn validate(&self, grid: &GridConfig) -> Result<()> {
        let ranks = [self.px, self.py, self.pz];
        for (axis, (&p, n)) in ranks.iter().zip(grid.dims()).enumerate() {
            if p == 0 {
                return Err(anyhow!("Rank count along axis {} must be positive", axis));
            }
            // A single rank along an axis never exchanges halos there.
            if p > 1 && n / p < crate::grid::HALO {
                return Err(anyhow!(
                    "{} ranks along axis {} leave fewer than {} points per rank (n={})",
                    p,
                    axis,
                    crate::grid::HALO,
                    n
                ));
            }
        }
        Ok(())
    }

    pub fn ranks(&self) -> [usize; 3] {
        [self.px, self.py, self.pz]
    }
}

/// Time stepping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>, // Optional: computed from CFL if not provided
    pub tmax: f64,
    #[serde(default = "default_cfl_safety")]
    pub cfl_safety: f64,
}

fn default_cfl_safety() -> f64 {
    0.5
}

impl TimeConfig {
    fn validate(&self) -> Result<()> {
        if self.tmax <= 0.0 {
            return Err(anyhow!("tmax must be positive, got {}", self.tmax));
        }
        if self.cfl_safety <= 0.0 || self.cfl_safety > 1.0 {
            return Err(anyhow!("cfl_safety must be in (0, 1], got {}", self.cfl_safety));
        }
        if let Some(dt) = self.dt {
            if dt <= 0.0 {
                return Err(anyhow!("dt must be positive, got {}", dt));
            }
        }
        Ok(())
    }

    /// Largest stable step: `cfl_safety * dh / (vp_max * sqrt(3))`.
    pub fn stable_dt(&self, dh: f64, vp_max: f64) -> f64 {
        self.cfl_safety * dh / (vp_max * 3.0_f64.sqrt())
    }

    pub fn check_cfl(&self, dt: f64, dh: f64, vp_max: f64) -> bool {
        dt <= self.stable_dt(dh, vp_max)
    }

    /// Compute dt from CFL condition if not specified
    pub fn compute_dt_if_needed(&mut self, dh: f64, vp_max: f64) {
        if self.dt.is_none() {
            self.dt = Some(self.stable_dt(dh, vp_max));
        }
    }

    /// Number of timesteps: `floor(tmax / dt)`.
    pub fn compute_nt(&self, dt: f64) -> usize {
        (self.tmax / dt).floor() as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeConfig {
    #[serde(default = "default_scheme")]
    pub kind: SchemeKind,
}

fn default_scheme() -> SchemeKind {
    SchemeKind::FiniteDifference
}

impl Default for SchemeConfig {
    fn default() -> Self {
        SchemeConfig {
            kind: default_scheme(),
        }
    }
}

/// CPML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmlConfig {
    #[serde(default = "default_pml_thickness")]
    pub thickness: usize,
    #[serde(default = "default_reflection")]
    pub reflection: f64,
    #[serde(default = "default_kappa_max")]
    pub kappa_max: f64,
    /// Dominant frequency for `α_max = π f0`; the Ricker frequency when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
}

fn default_pml_thickness() -> usize {
    10
}

fn default_reflection() -> f64 {
    1e-3
}

fn default_kappa_max() -> f64 {
    1.0
}

impl PmlConfig {
    fn validate(&self) -> Result<()> {
        if self.thickness == 0 {
            return Err(anyhow!("PML thickness must be positive"));
        }
        if self.reflection <= 0.0 || self.reflection >= 1.0 {
            return Err(anyhow!("PML reflection must be in (0, 1), got {}", self.reflection));
        }
        if self.kappa_max < 1.0 {
            return Err(anyhow!("PML kappa_max must be at least 1, got {}", self.kappa_max));
        }
        if let Some(f) = self.frequency {
            if f <= 0.0 {
                return Err(anyhow!("PML frequency must be positive, got {}", f));
            }
        }
        Ok(())
    }
}

/// Exponential sponge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpDecayConfig {
    #[serde(default = "default_decay_thickness")]
    pub thickness: usize,
    #[serde(default = "default_edge_factor")]
    pub edge_factor: f64,
}

fn default_decay_thickness() -> usize {
    20
}

fn default_edge_factor() -> f64 {
    0.92
}

impl ExpDecayConfig {
    fn validate(&self) -> Result<()> {
        if self.thickness == 0 {
            return Err(anyhow!("exp_decay thickness must be positive"));
        }
        if self.edge_factor <= 0.0 || self.edge_factor > 1.0 {
            return Err(anyhow!(
                "exp_decay edge_factor must be in (0, 1], got {}",
                self.edge_factor
            ));
        }
        Ok(())
    }
}

/// Boundary treatments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    #[serde(default = "default_free_surface")]
    pub free_surface: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pml: Option<PmlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp_decay: Option<ExpDecayConfig>,
}

fn default_free_surface() -> bool {
    true
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        BoundaryConfig {
            free_surface: default_free_surface(),
            pml: None,
            exp_decay: None,
        }
    }
}

impl BoundaryConfig {
    fn validate(&self, grid: &GridConfig, ranks: &RanksConfig) -> Result<()> {
        if let Some(pml) = &self.pml {
            pml.validate()?;
            // Every rank owning an absorbing face must hold the whole layer.
            for (axis, (&p, n)) in ranks.ranks().iter().zip(grid.dims()).enumerate() {
                let smallest = n / p;
                if smallest < pml.thickness {
                    return Err(anyhow!(
                        "PML thickness {} exceeds the {} points per rank along axis {}",
                        pml.thickness,
                        smallest,
                        axis
                    ));
                }
            }
        }
        if let Some(decay) = &self.exp_decay {
            decay.validate()?;
        }
        Ok(())
    }
}

/// Homogeneous medium used by the driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumConfig {
    pub vp: f64,  // P-wave velocity (m/s)
    pub vs: f64,  // S-wave velocity (m/s)
    pub rho: f64, // Density (kg/m³)
}

impl MediumConfig {
    fn validate(&self) -> Result<()> {
        if self.vp <= 0.0 || self.vs <= 0.0 || self.rho <= 0.0 {
            return Err(anyhow!(
                "Medium properties must be positive (vp={}, vs={}, rho={})",
                self.vp,
                self.vs,
                self.rho
            ));
        }
        if self.vs > self.vp {
            return Err(anyhow!(
                "S-wave velocity must be less than P-wave velocity (vs={} > vp={})",
                self.vs,
                self.vp
            ));
        }
        Ok(())
    }
}

/// Ricker body force at one grid point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RickerConfig {
    pub index: [usize; 3],
    pub amplitude: f64,
    pub frequency: f64,
    #[serde(default = "default_direction")]
    pub direction: [f64; 3],
}

fn default_direction() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

impl RickerConfig {
    fn validate(&self, grid: &GridConfig) -> Result<()> {
        if !grid.contains(self.index) {
            return Err(anyhow!(
                "Ricker source {:?} is outside grid bounds {:?}",
                self.index,
                grid.dims()
            ));
        }
        if self.frequency <= 0.0 {
            return Err(anyhow!("Source frequency must be positive, got {}", self.frequency));
        }
        if self.direction.iter().all(|&d| d == 0.0) {
            return Err(anyhow!("Ricker direction must be non-zero"));
        }
        Ok(())
    }
}

/// Double-couple point source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoubleCoupleConfig {
    pub index: [usize; 3],
    pub strike: f64, // degrees
    pub dip: f64,    // degrees
    pub rake: f64,   // degrees
    pub magnitude: f64,
    pub duration: f64, // seconds
}

impl DoubleCoupleConfig {
    fn validate(&self, grid: &GridConfig) -> Result<()> {
        if !grid.contains(self.index) {
            return Err(anyhow!(
                "Double-couple source {:?} is outside grid bounds {:?}",
                self.index,
                grid.dims()
            ));
        }
        if self.duration <= 0.0 {
            return Err(anyhow!("Source duration must be positive, got {}", self.duration));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ricker: Option<RickerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_couple: Option<DoubleCoupleConfig>,
}

/// Diagnostics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_it_skip")]
    pub it_skip: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_x: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_y: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_z: Option<usize>,
    #[serde(default)]
    pub free_surface_slice: bool,
    #[serde(default)]
    pub displacement: bool,
    #[serde(default = "default_pgv")]
    pub pgv: bool,
    #[serde(default)]
    pub peak_acceleration: bool,
    /// Steps between refreshes of the PGA reference velocity.
    #[serde(default = "default_pga_period")]
    pub pga_period: usize,
}

fn default_it_skip() -> usize {
    1
}

fn default_pgv() -> bool {
    true
}

fn default_pga_period() -> usize {
    10
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            it_skip: default_it_skip(),
            slice_x: None,
            slice_y: None,
            slice_z: None,
            free_surface_slice: false,
            displacement: false,
            pgv: default_pgv(),
            peak_acceleration: false,
            pga_period: default_pga_period(),
        }
    }
}

impl OutputConfig {
    fn validate(&self, grid: &GridConfig) -> Result<()> {
        if self.it_skip == 0 {
            return Err(anyhow!("it_skip must be positive"));
        }
        if self.pga_period == 0 {
            return Err(anyhow!("pga_period must be positive"));
        }
        let slices = [self.slice_x, self.slice_y, self.slice_z];
        for (axis, (slice, n)) in slices.iter().zip(grid.dims()).enumerate() {
            if let Some(index) = slice {
                if *index >= n {
                    return Err(anyhow!(
                        "Slice index {} along axis {} is outside the grid (n={})",
                        index,
                        axis,
                        n
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Recording station at a global grid index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub name: String,
    pub index: [usize; 3],
}

/// Complete propagation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    #[serde(default)]
    pub ranks: RanksConfig,
    pub time: TimeConfig,
    #[serde(default)]
    pub scheme: SchemeConfig,
    #[serde(default)]
    pub boundary: BoundaryConfig,
    pub medium: MediumConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file '{}': {}", path, e))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))?;

        // Validate before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&mut self) -> Result<()> {
        self.grid.validate()?;
        self.ranks.validate(&self.grid)?;
        self.time.validate()?;
        self.boundary.validate(&self.grid, &self.ranks)?;
        self.medium.validate()?;
        self.output.validate(&self.grid)?;

        if let Some(ricker) = &self.source.ricker {
            ricker.validate(&self.grid)?;
        }
        if let Some(dc) = &self.source.double_couple {
            dc.validate(&self.grid)?;
        }
        for station in &self.stations {
            if !self.grid.contains(station.index) {
                return Err(anyhow!(
                    "Station '{}' at {:?} is outside grid bounds {:?}",
                    station.name,
                    station.index,
                    self.grid.dims()
                ));
            }
        }

        // Compute dt from CFL if needed, then check it
        let vp_max = self.medium.vp;
        self.time.compute_dt_if_needed(self.grid.dh, vp_max);
        let dt = self.dt();
        if !self.time.check_cfl(dt, self.grid.dh, vp_max) {
            return Err(anyhow!(
                "CFL condition violated! dt={}, max stable dt={}",
                dt,
                self.time.stable_dt(self.grid.dh, vp_max)
            ));
        }
        if self.nt() == 0 {
            return Err(anyhow!("tmax={} is shorter than one step (dt={})", self.time.tmax, dt));
        }
        if dt < 1e-7 {
            warn!(dt, "computed dt is very small, propagation may be slow");
        }

        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.time.dt.unwrap_or(0.0)
    }

    pub fn nt(&self) -> usize {
        let dt = self.dt();
        if dt > 0.0 {
            self.time.compute_nt(dt)
        } else {
            0
        }
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.grid.dims(), self.grid.dh, self.ranks.ranks())
    }

    pub fn pml_params(&self) -> Option<PmlParams> {
        self.boundary.pml.as_ref().map(|pml| {
            let f0 = pml
                .frequency
                .or(self.source.ricker.as_ref().map(|r| r.frequency))
                .unwrap_or(1.0);
            PmlParams {
                thickness: pml.thickness,
                reflection: pml.reflection,
                kappa_max: pml.kappa_max,
                alpha_max: PI * f0,
            }
        })
    }

    pub fn decay_params(&self) -> Option<DecayParams> {
        self.boundary.exp_decay.as_ref().map(|d| DecayParams {
            thickness: d.thickness,
            edge_factor: d.edge_factor,
        })
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        let g = &self.grid;
        info!(
            "Grid: {}x{}x{} ({} x {} x {} m), ranks {}x{}x{}",
            g.nx,
            g.ny,
            g.nz,
            g.nx as f64 * g.dh,
            g.ny as f64 * g.dh,
            g.nz as f64 * g.dh,
            self.ranks.px,
            self.ranks.py,
            self.ranks.pz
        );
        info!(
            "Medium: Vp={} m/s, Vs={} m/s, ρ={} kg/m³",
            self.medium.vp, self.medium.vs, self.medium.rho
        );
        info!(
            "Time: dt={} s, nt={}, tmax={} s, scheme={:?}",
            self.dt(),
            self.nt(),
            self.time.tmax,
            self.scheme.kind
        );
        info!(
            "Boundary: free_surface={}, pml={}, exp_decay={}",
            self.boundary.free_surface,
            self.boundary.pml.is_some(),
            self.boundary.exp_decay.is_some()
        );
        if let Some(r) = &self.source.ricker {
            info!(
                "Ricker source at {:?}, freq={} Hz, amp={}",
                r.index, r.frequency, r.amplitude
            );
        }
        if let Some(dc) = &self.source.double_couple {
            info!(
                "Double-couple source at {:?}, Mw={}, strike/dip/rake={}/{}/{}",
                dc.index, dc.magnitude, dc.strike, dc.dip, dc.rake
            );
        }
        info!(
            "Output: it_skip={}, {} station(s)",
            self.output.it_skip,
            self.stations.len()
        );
    }
}
