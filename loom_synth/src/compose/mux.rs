//! Multiplexer router.
//!
//! Routes one of N per-unit signals to a single shared consumer, keyed by
//! a runtime integer selector (the active extruder/tool index), and
//! broadcasts shared commands back to per-unit lines through a 1-of-N
//! decoder. A table-driven variant derives N near-identical wiring
//! fragments from a list of [`PerUnitSignalSpec`] rows.

use loom_common::signal::{SignalKind, SignalValue};
use tracing::debug;

use crate::catalog::{BlockType, PinRole};
use crate::error::{SynthError, SynthResult};
use crate::topology::{SignalHandle, ThreadId, TopologyBuilder};

// ─── RouterKind ─────────────────────────────────────────────────────

/// Payload kind of a routed signal, dispatched once via `match` — never
/// by string concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterKind {
    /// Floating-point payload (velocities, diameters, temperatures).
    Analog,
    /// Integer payload (counts, modes).
    Digital,
    /// Boolean payload (enables, directions).
    Bit,
}

impl RouterKind {
    /// Signal kind carried by this router.
    pub fn signal_kind(&self) -> SignalKind {
        match self {
            Self::Analog => SignalKind::Float,
            Self::Digital => SignalKind::S32,
            Self::Bit => SignalKind::Bit,
        }
    }
}

// ─── N-to-1 routing ─────────────────────────────────────────────────

/// Route N inputs to one output, keyed by `selector`.
///
/// Creates a single mux instance sized to `inputs.len()` — the pincount
/// always matches the input count. An out-of-range selector value is a
/// runtime concern: the reference evaluator clamps it to `[0, N-1]`.
pub fn route(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    name: &str,
    inputs: &[SignalHandle],
    selector: &SignalHandle,
    kind: RouterKind,
) -> SynthResult<SignalHandle> {
    if inputs.is_empty() {
        return Err(SynthError::EmptyMux(name.to_string()));
    }

    let mux = b.new_block(
        BlockType::Mux {
            kind: kind.signal_kind(),
            inputs: inputs.len(),
        },
        &format!("{name}.mux"),
        thread,
    )?;
    for (i, input) in inputs.iter().enumerate() {
        b.link(mux, PinRole::In(i as u8), input)?;
    }
    b.link(mux, PinRole::Sel, selector)?;

    let output = b.new_signal(name, kind.signal_kind())?;
    b.link(mux, PinRole::Out, &output)?;
    Ok(output)
}

/// Broadcast the selector to per-unit select lines: `out[i]` true iff the
/// selector equals `i`. Used to gate per-unit enables off one shared
/// selection. Out-of-range selection asserts no line at all.
pub fn select_lines(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    name: &str,
    units: usize,
    selector: &SignalHandle,
) -> SynthResult<Vec<SignalHandle>> {
    let decoder = b.new_block(
        BlockType::Select { outputs: units },
        &format!("{name}.select-decode"),
        thread,
    )?;
    b.link(decoder, PinRole::Sel, selector)?;

    let mut lines = Vec::with_capacity(units);
    for i in 0..units {
        let line = b.new_signal(&format!("{name}.selected-{i}"), SignalKind::Bit)?;
        b.link(decoder, PinRole::Selected(i as u8), &line)?;
        lines.push(line);
    }
    Ok(lines)
}

// ─── Table-driven per-unit routing ──────────────────────────────────

/// One row of the shared per-unit signal table.
///
/// `initials` carries the per-unit configuration values the signals start
/// from; `None` means the row has no external binding — the mux is still
/// emitted, one per row, so the 1:1 row-to-mux mapping holds for every
/// table shape.
#[derive(Debug, Clone)]
pub struct PerUnitSignalSpec {
    /// Signal base name (e.g. "jog-velocity").
    pub name: &'static str,
    /// Payload kind.
    pub kind: RouterKind,
    /// Per-unit initial values, one entry per unit when present.
    pub initials: Option<Vec<SignalValue>>,
}

/// One routed row: the per-unit inputs and the shared output.
#[derive(Debug, Clone)]
pub struct RoutedGroup {
    pub name: &'static str,
    pub inputs: Vec<SignalHandle>,
    pub output: SignalHandle,
}

/// Apply [`route`] uniformly to every table row.
///
/// For each spec, creates `units` per-unit signals named
/// `{unit_prefix}-{i}.{spec.name}` and one shared output named
/// `{shared_prefix}.{spec.name}`, joined by one mux keyed by `selector`.
pub fn route_per_unit_signals(
    b: &mut TopologyBuilder,
    thread: ThreadId,
    specs: &[PerUnitSignalSpec],
    units: usize,
    unit_prefix: &str,
    shared_prefix: &str,
    selector: &SignalHandle,
) -> SynthResult<Vec<RoutedGroup>> {
    let mut groups = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut inputs = Vec::with_capacity(units);
        for i in 0..units {
            let initial = spec
                .initials
                .as_ref()
                .and_then(|values| values.get(i).copied());
            let signal = b.new_signal_with_initial(
                &format!("{unit_prefix}-{i}.{}", spec.name),
                spec.kind.signal_kind(),
                initial,
            )?;
            inputs.push(signal);
        }
        let output = route(
            b,
            thread,
            &format!("{shared_prefix}.{}", spec.name),
            &inputs,
            selector,
            spec.kind,
        )?;
        groups.push(RoutedGroup {
            name: spec.name,
            inputs,
            output,
        });
    }
    debug!(
        rows = specs.len(),
        units, "routed per-unit signal table"
    );
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (TopologyBuilder, ThreadId, SignalHandle) {
        let mut b = TopologyBuilder::new();
        let t = b.new_thread("servo-thread", 1_000_000).unwrap();
        let sel = b.new_signal("extruder.select", SignalKind::S32).unwrap();
        (b, t, sel)
    }

    #[test]
    fn empty_inputs_rejected() {
        let (mut b, t, sel) = setup();
        let err = route(&mut b, t, "shared.x", &[], &sel, RouterKind::Analog).unwrap_err();
        assert!(matches!(err, SynthError::EmptyMux(_)));
    }

    #[test]
    fn pincount_matches_input_count() {
        let (mut b, t, sel) = setup();
        let inputs: Vec<_> = (0..3)
            .map(|i| {
                b.new_signal(&format!("extruder-{i}.jog-velocity"), SignalKind::Float)
                    .unwrap()
            })
            .collect();

        route(&mut b, t, "shared.jog-velocity", &inputs, &sel, RouterKind::Analog).unwrap();

        let topo = b.freeze();
        let mux = topo.block_named("shared.jog-velocity.mux").unwrap();
        assert_eq!(
            mux.block_type,
            BlockType::Mux {
                kind: SignalKind::Float,
                inputs: 3
            }
        );
    }

    #[test]
    fn table_rows_map_one_to_one() {
        let (mut b, t, sel) = setup();
        let table = [
            PerUnitSignalSpec {
                name: "jog-velocity",
                kind: RouterKind::Analog,
                initials: Some(vec![SignalValue::Float(5.0), SignalValue::Float(8.0)]),
            },
            PerUnitSignalSpec {
                name: "jog-direction",
                kind: RouterKind::Bit,
                initials: None,
            },
            PerUnitSignalSpec {
                name: "filament-dia",
                kind: RouterKind::Analog,
                initials: Some(vec![SignalValue::Float(1.75), SignalValue::Float(2.85)]),
            },
        ];

        let groups =
            route_per_unit_signals(&mut b, t, &table, 2, "extruder", "extruder.shared", &sel)
                .unwrap();
        assert_eq!(groups.len(), 3);

        let topo = b.freeze();
        // One mux per row, even for the unbound jog-direction row.
        assert_eq!(
            topo.blocks_where(|t| matches!(t, BlockType::Mux { .. })).count(),
            3
        );
        let (_, per_unit) = topo.signal_named("extruder-1.filament-dia").unwrap();
        assert_eq!(per_unit.initial, Some(SignalValue::Float(2.85)));
        let (_, unbound) = topo.signal_named("extruder-0.jog-direction").unwrap();
        assert_eq!(unbound.initial, None);
        assert!(topo.signal_named("extruder.shared.jog-velocity").is_some());
    }

    #[test]
    fn select_lines_fan_out() {
        let (mut b, t, sel) = setup();
        let lines = select_lines(&mut b, t, "extruder", 4, &sel).unwrap();
        assert_eq!(lines.len(), 4);

        let topo = b.freeze();
        let decoder = topo.block_named("extruder.select-decode").unwrap();
        assert_eq!(decoder.block_type, BlockType::Select { outputs: 4 });
    }
}
