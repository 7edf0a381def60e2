use std::ops::Range;

/// Ghost-layer width on every side of a rank's block. The WENO5
/// reconstruction reaches three cells.
pub const HALO: usize = 3;

/// One of the six axis-aligned directions. Doubles as the name of a global
/// face (`XMinus` is the global x = 0 face, `ZPlus` is the top).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    XMinus,
    XPlus,
    YMinus,
    YPlus,
    ZMinus,
    ZPlus,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::XMinus,
        Direction::XPlus,
        Direction::YMinus,
        Direction::YPlus,
        Direction::ZMinus,
        Direction::ZPlus,
    ];

    pub fn new(axis: usize, plus: bool) -> Self {
        match (axis, plus) {
            (0, false) => Direction::XMinus,
            (0, true) => Direction::XPlus,
            (1, false) => Direction::YMinus,
            (1, true) => Direction::YPlus,
            (2, false) => Direction::ZMinus,
            _ => Direction::ZPlus,
        }
    }

    pub fn axis(self) -> usize {
        self as usize / 2
    }

    pub fn is_plus(self) -> bool {
        self as usize % 2 == 1
    }

    pub fn opposite(self) -> Self {
        Direction::new(self.axis(), !self.is_plus())
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Immutable set of global faces owned by a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceSet(u8);

impl FaceSet {
    pub fn empty() -> Self {
        FaceSet(0)
    }

    pub fn with(self, face: Direction) -> Self {
        FaceSet(self.0 | face.bit())
    }

    pub fn contains(&self, face: Direction) -> bool {
        self.0 & face.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(|d| self.contains(*d))
    }
}

/// Neighbor rank ids per direction, `None` at the global edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Neighbors([Option<usize>; 6]);

impl Neighbors {
    pub fn get(&self, direction: Direction) -> Option<usize> {
        self.0[direction as usize]
    }

    pub fn count(&self) -> usize {
        self.0.iter().flatten().count()
    }
}

/// Global grid and its Cartesian rank decomposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub nx: usize, // Global points in x
    pub ny: usize, // Global points in y
    pub nz: usize, // Global points in z (z points up)
    pub dh: f64,   // Uniform spacing (meters)
    pub px: usize, // Ranks along x
    pub py: usize, // Ranks along y
    pub pz: usize, // Ranks along z
}

impl Grid {
    pub fn new(dims: [usize; 3], dh: f64, ranks: [usize; 3]) -> Self {
        Grid {
            nx: dims[0],
            ny: dims[1],
            nz: dims[2],
            dh,
            px: ranks[0],
            py: ranks[1],
            pz: ranks[2],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    pub fn ranks(&self) -> [usize; 3] {
        [self.px, self.py, self.pz]
    }

    pub fn rank_count(&self) -> usize {
        self.px * self.py * self.pz
    }

    pub fn rank_id(&self, coord: [usize; 3]) -> usize {
        coord[0] + self.px * (coord[1] + self.py * coord[2])
    }

    pub fn coord_of(&self, rank: usize) -> [usize; 3] {
        [
            rank % self.px,
            (rank / self.px) % self.py,
            rank / (self.px * self.py),
        ]
    }

    /// Physical coordinate of global index `idx` along `axis`.
    pub fn in_bounds(&self, i: usize, j: usize, k: usize) -> bool {
        i < self.nx && j < self.ny && k < self.nz
    }

    /// Start and length of block `p` when `n` points are split over `parts`.
    /// The first `n % parts` blocks get one extra point.
    pub fn split(n: usize, parts: usize, p: usize) -> (usize, usize) {
        let base = n / parts;
        let rem = n % parts;
        let len = base + usize::from(p < rem);
        let start = p * base + p.min(rem);
        (start, len)
    }

    pub fn subdomain(&self, rank: usize) -> Subdomain {
        let coord = self.coord_of(rank);
        let dims = self.dims();
        let ranks = self.ranks();

        let mut start = [0; 3];
        let mut extent = [0; 3];
        let mut neighbors = [None; 6];
        let mut faces = FaceSet::empty();
        for axis in 0..3 {
            let (s, n) = Grid::split(dims[axis], ranks[axis], coord[axis]);
            start[axis] = s;
            extent[axis] = n;

            let minus = Direction::new(axis, false);
            let plus = Direction::new(axis, true);
            if coord[axis] == 0 {
                faces = faces.with(minus);
            } else {
                let mut c = coord;
                c[axis] -= 1;
                neighbors[minus as usize] = Some(self.rank_id(c));
            }
            if coord[axis] + 1 == ranks[axis] {
                faces = faces.with(plus);
            } else {
                let mut c = coord;
                c[axis] += 1;
                neighbors[plus as usize] = Some(self.rank_id(c));
            }
        }

        Subdomain {
            rank,
            coord,
            start,
            extent,
            neighbors: Neighbors(neighbors),
            faces,
            dh: self.dh,
        }
    }

    pub fn subdomains(&self) -> Vec<Subdomain> {
        (0..self.rank_count()).map(|r| self.subdomain(r)).collect()
    }
}

/// Per-rank descriptor: interior block, ghost padding, neighbors and owned
/// global faces. Local index `HALO + n` along an axis is global index
/// `start + n`.
#[derive(Debug, Clone, PartialEq)]
pub struct Subdomain {
    pub rank: usize,
    pub coord: [usize; 3],
    pub start: [usize; 3],
    pub extent: [usize; 3],
    pub neighbors: Neighbors,
    pub faces: FaceSet,
    pub dh: f64,
}

impl Subdomain {
    /// Padded local dimensions including ghost layers.
    pub fn padded(&self) -> [usize; 3] {
        [
            self.extent[0] + 2 * HALO,
            self.extent[1] + 2 * HALO,
            self.extent[2] + 2 * HALO,
        ]
    }

    pub fn interior(&self, axis: usize) -> Range<usize> {
        HALO..HALO + self.extent[axis]
    }

    pub fn is_interior(&self, idx: [usize; 3]) -> bool {
        (0..3).all(|a| self.interior(a).contains(&idx[a]))
    }

    pub fn owns(&self, face: Direction) -> bool {
        self.faces.contains(face)
    }

    /// Local index of a global interior cell, if this rank owns it.
    pub fn to_local(&self, global: [usize; 3]) -> Option<[usize; 3]> {
        let mut local = [0; 3];
        for axis in 0..3 {
            let g = global[axis];
            if g < self.start[axis] || g >= self.start[axis] + self.extent[axis] {
                return None;
            }
            local[axis] = g - self.start[axis] + HALO;
        }
        Some(local)
    }

    /// Global index of a local (possibly ghost) cell; may fall outside the
    /// global grid for ghosts at the edge.
    pub fn to_global(&self, local: [usize; 3]) -> [isize; 3] {
        [0, 1, 2].map(|a| local[a] as isize - HALO as isize + self.start[a] as isize)
    }

    /// Local z index of the free-surface layer on ranks owning the top face.
    pub fn surface_layer(&self) -> Option<usize> {
        self.owns(Direction::ZPlus)
            .then(|| HALO + self.extent[2] - 1)
    }
}
