//! Interpolating leaf field and its scalar wire adapters.
//!
//! A field holds one typed value and blends received values in over a tick
//! window so discrete network updates render smoothly. Remote writes are
//! gated by vector-clock priority; local writes take effect immediately.
//!
//! # Wire primitives
//!
//! | Variant  | Payload                      |
//! |----------|------------------------------|
//! | `Bool`   | 1 byte, nonzero = true       |
//! | `Int`    | 4-byte i32, big-endian       |
//! | `Float`  | 4-byte f32 bits, big-endian  |
//! | `Str`    | vu57 byte length + UTF-8     |
//! | `Vec2`   | 2 × f32                      |
//! | `Color`  | 4 × u8 (RGBA)                |
//! | `Enum`   | 4-byte u32, big-endian       |

use treesync_buffers::{Reader, Writer};

use crate::clock::VersionVector;
use crate::error::SyncError;

/// Interpolation factor past which extrapolation gives up and snaps.
pub const EXTRAPOLATION_CAP: f32 = 2.0;

// ── FieldValue ─────────────────────────────────────────────────────────────

/// The closed set of scalar payloads a field can carry.
///
/// The primitive set is fixed, so dispatch is a plain enum match rather
/// than a trait object per type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Vec2 { x: f32, y: f32 },
    Color { r: u8, g: u8, b: u8, a: u8 },
    Enum(u32),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Vec2 { .. } => "vec2",
            FieldValue::Color { .. } => "color",
            FieldValue::Enum(_) => "enum",
        }
    }

    /// The zero value of the same variant.
    pub fn zeroed(&self) -> FieldValue {
        match self {
            FieldValue::Bool(_) => FieldValue::Bool(false),
            FieldValue::Int(_) => FieldValue::Int(0),
            FieldValue::Float(_) => FieldValue::Float(0.0),
            FieldValue::Str(_) => FieldValue::Str(String::new()),
            FieldValue::Vec2 { .. } => FieldValue::Vec2 { x: 0.0, y: 0.0 },
            FieldValue::Color { .. } => FieldValue::Color { r: 0, g: 0, b: 0, a: 0 },
            FieldValue::Enum(_) => FieldValue::Enum(0),
        }
    }

    /// Whether the variant supports blending between two values.
    ///
    /// Non-blendable variants collapse a remote write straight to a clean
    /// set instead of opening an interpolation window.
    pub fn can_lerp(&self) -> bool {
        matches!(
            self,
            FieldValue::Int(_)
                | FieldValue::Float(_)
                | FieldValue::Vec2 { .. }
                | FieldValue::Color { .. }
        )
    }

    /// Blends `from` toward `to` at `factor`. Factors above 1 extrapolate
    /// linearly. Variants that cannot blend hold `from`.
    pub fn lerp(from: &FieldValue, to: &FieldValue, factor: f32) -> FieldValue {
        let t = factor;
        match (from, to) {
            (FieldValue::Int(a), FieldValue::Int(b)) => {
                FieldValue::Int((*a as f32 + (*b - *a) as f32 * t).round() as i32)
            }
            (FieldValue::Float(a), FieldValue::Float(b)) => FieldValue::Float(a + (b - a) * t),
            (FieldValue::Vec2 { x: ax, y: ay }, FieldValue::Vec2 { x: bx, y: by }) => {
                FieldValue::Vec2 {
                    x: ax + (bx - ax) * t,
                    y: ay + (by - ay) * t,
                }
            }
            (
                FieldValue::Color { r: ar, g: ag, b: ab, a: aa },
                FieldValue::Color { r: br, g: bg, b: bb, a: ba },
            ) => FieldValue::Color {
                r: lerp_u8(*ar, *br, t),
                g: lerp_u8(*ag, *bg, t),
                b: lerp_u8(*ab, *bb, t),
                a: lerp_u8(*aa, *ba, t),
            },
            _ => from.clone(),
        }
    }

    /// Writes the raw payload (no type tag; the tree shape is the schema).
    pub fn encode(&self, w: &mut Writer) {
        match self {
            FieldValue::Bool(v) => w.u8(u8::from(*v)),
            FieldValue::Int(v) => w.i32(*v),
            FieldValue::Float(v) => w.f32(*v),
            FieldValue::Str(s) => {
                w.vu57(s.len() as u64);
                w.utf8(s);
            }
            FieldValue::Vec2 { x, y } => {
                w.f32(*x);
                w.f32(*y);
            }
            FieldValue::Color { r, g, b, a } => {
                w.u8(*r);
                w.u8(*g);
                w.u8(*b);
                w.u8(*a);
            }
            FieldValue::Enum(v) => w.u32(*v),
        }
    }

    /// Reads a payload of the same variant as `self`.
    pub fn decode_like(&self, r: &mut Reader<'_>) -> Result<FieldValue, SyncError> {
        Ok(match self {
            FieldValue::Bool(_) => FieldValue::Bool(r.u8()? != 0),
            FieldValue::Int(_) => FieldValue::Int(r.i32()?),
            FieldValue::Float(_) => FieldValue::Float(r.f32()?),
            FieldValue::Str(_) => {
                let len = r.vu57()? as usize;
                FieldValue::Str(r.utf8(len)?.to_string())
            }
            FieldValue::Vec2 { .. } => FieldValue::Vec2 {
                x: r.f32()?,
                y: r.f32()?,
            },
            FieldValue::Color { .. } => FieldValue::Color {
                r: r.u8()?,
                g: r.u8()?,
                b: r.u8()?,
                a: r.u8()?,
            },
            FieldValue::Enum(_) => FieldValue::Enum(r.u32()?),
        })
    }
    /// Writes a 1-byte type tag followed by the payload. Used where the
    /// receiver has no schema position to infer the type from, e.g. the
    /// keyed dictionary backing a collection.
    pub fn encode_tagged(&self, w: &mut Writer) {
        let tag = match self {
            FieldValue::Bool(_) => 0u8,
            FieldValue::Int(_) => 1,
            FieldValue::Float(_) => 2,
            FieldValue::Str(_) => 3,
            FieldValue::Vec2 { .. } => 4,
            FieldValue::Color { .. } => 5,
            FieldValue::Enum(_) => 6,
        };
        w.u8(tag);
        self.encode(w);
    }

    /// Reads a tagged payload written by [`FieldValue::encode_tagged`].
    pub fn decode_tagged(r: &mut Reader<'_>) -> Result<FieldValue, SyncError> {
        let template = match r.u8()? {
            0 => FieldValue::Bool(false),
            1 => FieldValue::Int(0),
            2 => FieldValue::Float(0.0),
            3 => FieldValue::Str(String::new()),
            4 => FieldValue::Vec2 { x: 0.0, y: 0.0 },
            5 => FieldValue::Color { r: 0, g: 0, b: 0, a: 0 },
            6 => FieldValue::Enum(0),
            other => return Err(SyncError::UnknownTag(other)),
        };
        template.decode_like(r)
    }
}

fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
    (a as f32 + (b as f32 - a as f32) * t).clamp(0.0, 255.0) as u8
}

// ── Field ──────────────────────────────────────────────────────────────────

/// Per-field interpolation settings.
#[derive(Debug, Clone, Copy)]
pub struct FieldConfig {
    /// Tick window over which a received value blends in. 0 disables
    /// interpolation entirely.
    pub window: u32,
    /// Continue blending past the window while updates keep arriving.
    pub extrapolate: bool,
    /// Hold the previous value for the whole window, then snap, instead of
    /// blending through intermediate values.
    pub wait: bool,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            window: 0,
            extrapolate: false,
            wait: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Clean,
    Interpolating,
    Extrapolating,
}

/// Outcome of applying a remote write, reported back to the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    /// Stamp did not take priority; nothing changed.
    Rejected,
    /// Applied immediately as a clean set.
    Snapped(FieldValue),
    /// Opened an interpolation window toward the value.
    Blending(FieldValue),
}

/// A leaf value holder with previous/target blending and version-gated
/// delta acceptance.
///
/// Idle invariant: when no interpolation is pending, `value == target` and
/// `previous` is the variant's zero value.
#[derive(Debug, Clone)]
pub struct Field {
    value: FieldValue,
    previous: FieldValue,
    target: FieldValue,
    start_tick: u64,
    last_remote_tick: u64,
    phase: Phase,
    version: VersionVector,
    config: FieldConfig,
}

impl Field {
    pub fn new(initial: FieldValue, config: FieldConfig) -> Self {
        let previous = initial.zeroed();
        Self {
            target: initial.clone(),
            value: initial,
            previous,
            start_tick: 0,
            last_remote_tick: 0,
            phase: Phase::Clean,
            version: VersionVector::new(),
            config,
        }
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn target(&self) -> &FieldValue {
        &self.target
    }

    pub fn config(&self) -> FieldConfig {
        self.config
    }

    pub fn version(&self) -> &VersionVector {
        &self.version
    }

    pub fn is_settled(&self) -> bool {
        self.phase == Phase::Clean
    }

    /// Snaps to the target and drops any in-flight interpolation.
    pub fn cancel_interpolation(&mut self) {
        self.value = self.target.clone();
        self.previous = self.value.zeroed();
        self.phase = Phase::Clean;
    }

    /// Resets version and interpolation state; used on attach/detach so no
    /// stale priority data survives a re-wiring.
    pub fn reset_replication_state(&mut self) {
        self.cancel_interpolation();
        self.version = VersionVector::new();
    }

    /// Local write when the field is already dirty and nobody is observing:
    /// just overwrite, no event bookkeeping needed.
    pub fn raw_set(&mut self, v: FieldValue) {
        self.value = v.clone();
        self.target = v;
        self.previous = self.value.zeroed();
        self.phase = Phase::Clean;
    }

    /// Local write: clean set to the new value. Returns the value for the
    /// change event the caller fires.
    ///
    /// A value of a different variant would change the field's wire type
    /// under every mirror tree, so it is rejected before any state moves.
    pub fn local_set(&mut self, v: FieldValue) -> Result<FieldValue, SyncError> {
        if v.kind() != self.value.kind() {
            return Err(SyncError::InvalidPayload { kind: v.kind() });
        }
        self.raw_set(v);
        Ok(self.value.clone())
    }

    /// Records the clock state under which the field last changed. Local
    /// writes merge the full clock here so a later echo of the same update
    /// (whose derived stamp carries nothing newer) fails the priority gate.
    pub fn merge_version(&mut self, stamp: &VersionVector) {
        self.version.merge(stamp);
    }

    /// Applies a remotely received value under the stamp derived from the
    /// receiving clock.
    ///
    /// The stamp must take priority over the recorded version or the write
    /// is rejected outright. An accepted write merges the stamp and either
    /// snaps (interpolation unavailable) or opens a blend window.
    pub fn remote_set(&mut self, v: FieldValue, stamp: &VersionVector, now: u64) -> RemoteWrite {
        // Even a rejected duplicate proves the sender is still talking,
        // which is what keeps extrapolation alive past the window.
        self.last_remote_tick = now;
        if !stamp.is_priority_over(&self.version) {
            return RemoteWrite::Rejected;
        }
        self.version.merge(stamp);
        if self.config.window == 0 || (!self.value.can_lerp() && !self.config.wait) {
            self.raw_set(v);
            return RemoteWrite::Snapped(self.value.clone());
        }
        self.previous = self.value.clone();
        self.target = v.clone();
        self.start_tick = now;
        self.last_remote_tick = now;
        self.phase = Phase::Interpolating;
        RemoteWrite::Blending(v)
    }

    /// Applies a full-snapshot value: no blending, version merged wholesale.
    pub fn snapshot_set(&mut self, v: FieldValue, stamp: &VersionVector) -> FieldValue {
        self.raw_set(v);
        self.version.merge(stamp);
        self.value.clone()
    }

    /// One render step at tick `now`.
    ///
    /// Returns `(still_ticking, visible)` where `visible` carries the final
    /// value once the blend completes and the target becomes fully visible.
    pub fn step(&mut self, now: u64) -> (bool, Option<FieldValue>) {
        if self.phase == Phase::Clean {
            return (false, None);
        }
        let window = self.config.window.max(1) as f32;
        let factor = now.saturating_sub(self.start_tick) as f32 / window;
        if factor < 1.0 {
            self.value = if self.config.wait {
                // Waiting mode holds the old value until the window passes.
                self.previous.clone()
            } else {
                FieldValue::lerp(&self.previous, &self.target, factor)
            };
            return (true, None);
        }
        let still_hearing = now.saturating_sub(self.last_remote_tick) <= self.config.window as u64;
        if self.config.extrapolate && still_hearing && factor <= EXTRAPOLATION_CAP {
            self.value = FieldValue::lerp(&self.previous, &self.target, factor);
            self.phase = Phase::Extrapolating;
            return (true, None);
        }
        self.value = self.target.clone();
        self.previous = self.value.zeroed();
        self.phase = Phase::Clean;
        (false, Some(self.value.clone()))
    }

    // ── Serialize contract ─────────────────────────────────────────────────

    /// Delta and full writes both carry just the current target value.
    pub fn write_value(&self, w: &mut Writer) {
        self.target.encode(w);
    }

    /// Decodes one payload of this field's wire type.
    pub fn read_value(&self, r: &mut Reader<'_>) -> Result<FieldValue, SyncError> {
        self.value.decode_like(r)
    }
}
