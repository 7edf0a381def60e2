//! Per-step sampling of the wavefield: station time series, peak surface
//! motion and periodic velocity slices. The sampler only reads the field;
//! its buffers are handed to the caller when the run ends.

use ndarray::{s, Array2, Array3, Array4, Axis};
use tracing::debug;

use crate::config::{OutputConfig, StationConfig};
use crate::grid::{Subdomain, HALO};
use crate::wavefield::{Wavefield, VX, VY, VZ, WSIZE};

/// PGV layers: `|Vx|`, `|Vy|`, `|Vz|`, horizontal, total.
pub const PGV_COMPONENTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub name: String,
    pub index: [usize; 3],
    /// One row per timestep, one column per field component.
    pub samples: Array2<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// Plane of constant global index along `axis`.
    Volume { axis: usize, index: usize },
    FreeSurface,
    FreeSurfaceDisplacement,
}

/// Velocity (or displacement) components over the rank's part of a plane,
/// shaped `(3, a, b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceFrame {
    pub it: usize,
    pub kind: SliceKind,
    pub data: Array3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfacePeaks {
    /// `(PGV_COMPONENTS, nx, ny)` over the rank's surface columns.
    pub pgv: Array3<f64>,
    pub pga: Option<Array2<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsOutput {
    pub stations: Vec<StationRecord>,
    pub slices: Vec<SliceFrame>,
    pub peaks: Option<SurfacePeaks>,
}

#[derive(Debug)]
struct Plane {
    axis: usize,
    local: usize,
    global: usize,
}

/// Surface velocity PGA is differenced against, refreshed every `period`
/// steps. Acceleration is the velocity change over the elapsed window.
#[derive(Debug)]
struct PgaWindow {
    reference: Array3<f64>,
    start: usize,
    period: usize,
}

#[derive(Debug)]
pub struct Diagnostics {
    sub: Subdomain,
    dt: f64,
    it_skip: usize,
    stations: Vec<(StationRecord, [usize; 3])>,
    planes: Vec<Plane>,
    surface_layer: Option<usize>,
    surface_slice: bool,
    peaks: Option<SurfacePeaks>,
    pga_window: Option<PgaWindow>,
    slices: Vec<SliceFrame>,
}

impl Diagnostics {
    pub fn new(
        sub: &Subdomain,
        output: &OutputConfig,
        stations: &[StationConfig],
        nt: usize,
        dt: f64,
        free_surface: bool,
    ) -> Self {
        let stations: Vec<_> = stations
            .iter()
            .filter_map(|st| {
                sub.to_local(st.index).map(|local| {
                    let record = StationRecord {
                        name: st.name.clone(),
                        index: st.index,
                        samples: Array2::zeros((nt, WSIZE)),
                    };
                    (record, local)
                })
            })
            .collect();

        let planes: Vec<Plane> = [output.slice_x, output.slice_y, output.slice_z]
            .into_iter()
            .enumerate()
            .filter_map(|(axis, slice)| {
                let global = slice?;
                let start = sub.start[axis];
                (global >= start && global < start + sub.extent[axis]).then(|| Plane {
                    axis,
                    local: global - start + HALO,
                    global,
                })
            })
            .collect();

        let surface_layer = if free_surface { sub.surface_layer() } else { None };
        let [nx, ny, _] = sub.extent;
        let peaks = (output.pgv && surface_layer.is_some()).then(|| SurfacePeaks {
            pgv: Array3::zeros((PGV_COMPONENTS, nx, ny)),
            pga: output.peak_acceleration.then(|| Array2::zeros((nx, ny))),
        });

        debug!(
            rank = sub.rank,
            stations = stations.len(),
            planes = planes.len(),
            surface = surface_layer.is_some(),
            "diagnostics allocated"
        );
        let pga_window = peaks
            .as_ref()
            .and_then(|p| p.pga.as_ref())
            .map(|_| PgaWindow {
                reference: Array3::zeros((3, nx, ny)),
                start: 0,
                period: output.pga_period.max(1),
            });
        Diagnostics {
            sub: sub.clone(),
            dt,
            it_skip: output.it_skip.max(1),
            stations,
            planes,
            surface_layer,
            surface_slice: output.free_surface_slice,
            peaks,
            pga_window,
            slices: Vec::new(),
        }
    }

    /// Records timestep `it`. `displacement` is `(3, padded)` when
    /// displacement integration is enabled.
    pub fn sample(&mut self, it: usize, w: &Wavefield, displacement: Option<&Array4<f64>>) {
        for (record, local) in &mut self.stations {
            if it < record.samples.nrows() {
                let [i, j, k] = *local;
                record
                    .samples
                    .row_mut(it)
                    .assign(&w.data.slice(s![.., i, j, k]));
            }
        }

        if let Some(layer) = self.surface_layer {
            self.update_peaks(it, w, layer);
        }

        if it % self.it_skip != 0 {
            return;
        }
        for plane in &self.planes {
            self.slices.push(SliceFrame {
                it,
                kind: SliceKind::Volume {
                    axis: plane.axis,
                    index: plane.global,
                },
                data: interior_plane(&w.data, &self.sub, plane.axis, plane.local),
            });
        }
        if let (Some(layer), true) = (self.surface_layer, self.surface_slice) {
            self.slices.push(SliceFrame {
                it,
                kind: SliceKind::FreeSurface,
                data: interior_plane(&w.data, &self.sub, 2, layer),
            });
            if let Some(u) = displacement {
                self.slices.push(SliceFrame {
                    it,
                    kind: SliceKind::FreeSurfaceDisplacement,
                    data: interior_plane(u, &self.sub, 2, layer),
                });
            }
        }
    }

    fn update_peaks(&mut self, it: usize, w: &Wavefield, layer: usize) {
        let Some(peaks) = &mut self.peaks else { return };
        let surface = interior_plane(&w.data, &self.sub, 2, layer);
        let (_, nx, ny) = surface.dim();
        for i in 0..nx {
            for j in 0..ny {
                let [vx, vy, vz] = [VX, VY, VZ].map(|c| surface[[c, i, j]]);
                let horizontal = (vx * vx + vy * vy).sqrt();
                let total = (vx * vx + vy * vy + vz * vz).sqrt();
                let values = [vx.abs(), vy.abs(), vz.abs(), horizontal, total];
                for (n, v) in values.into_iter().enumerate() {
                    let peak = &mut peaks.pgv[[n, i, j]];
                    *peak = peak.max(v);
                }
            }
        }
        if let (Some(pga), Some(window)) = (&mut peaks.pga, &mut self.pga_window) {
            let elapsed = (it + 1 - window.start) as f64 * self.dt;
            let reference = &window.reference;
            for i in 0..nx {
                for j in 0..ny {
                    let a2: f64 = (0..3)
                        .map(|c| ((surface[[c, i, j]] - reference[[c, i, j]]) / elapsed).powi(2))
                        .sum();
                    let peak = &mut pga[[i, j]];
                    *peak = peak.max(a2.sqrt());
                }
            }
            // `it + 1` steps are done; the next window starts from this state.
            if (it + 1) % window.period == 0 {
                window.reference = surface;
                window.start = it + 1;
            }
        }
    }

    pub fn finish(self) -> DiagnosticsOutput {
        DiagnosticsOutput {
            stations: self.stations.into_iter().map(|(record, _)| record).collect(),
            slices: self.slices,
            peaks: self.peaks,
        }
    }
}

/// First three components of `field` on the rank's interior part of the
/// plane `local` along `axis`.
fn interior_plane(field: &Array4<f64>, sub: &Subdomain, axis: usize, local: usize) -> Array3<f64> {
    let block = field.slice(s![0..3, sub.interior(0), sub.interior(1), sub.interior(2)]);
    block.index_axis(Axis(axis + 1), local - HALO).to_owned()
}
