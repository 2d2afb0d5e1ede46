//! Tests for the elementwise benchmark

use std::cell::Cell;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::align::{align_slice, OperandBuffer, PADDING};
use super::backend::{create, BackendOptions, ExprBackend, KernelBackend};
use super::expr::Program;
use super::*;
use crate::clock::Clock;

/// Clock that only advances when the fake kernel runs
struct TickClock<'a> {
    ticks: &'a Cell<f64>,
}

impl Clock for TickClock<'_> {
    fn now(&self) -> f64 {
        self.ticks.get()
    }

    fn name(&self) -> &'static str {
        "ticks"
    }
}

fn smallest_power_of_two_reaching(cost: f64, goal: f64) -> u64 {
    let mut k = 1u64;
    while (k as f64) * cost < goal {
        k *= 2;
    }
    k
}

fn small_config() -> UmathConfig {
    UmathConfig::new()
        .with_sizes(vec![64])
        .with_goal_time_ms(0.01)
        .with_repeats(2)
        .with_offsets(vec![0, 1])
        .with_wall_clock(true)
}

fn run_to_string(config: UmathConfig) -> String {
    let out = run(config, Vec::new()).unwrap();
    String::from_utf8(out).unwrap()
}

// ============================================================================
// calibration
// ============================================================================

#[test]
fn test_calibrate_stops_at_first_count_reaching_goal() {
    let ticks = Cell::new(0.0);
    let clock = TickClock { ticks: &ticks };
    let mut kernel = || ticks.set(ticks.get() + 3.0);

    let calibration = calibrate(&clock, &mut kernel, 10.0, 4);
    // 1*3, 2*3 and 4*3 are measured; 4*3 = 12 >= 10
    assert_eq!(calibration.internal_count, 4);
    assert_eq!(calibration.elapsed, 12.0);
}

#[test]
fn test_run_bench_reduces_to_per_call_cost() {
    let ticks = Cell::new(0.0);
    let clock = TickClock { ticks: &ticks };
    let mut kernel = || ticks.set(ticks.get() + 1024.0);

    let per_call = run_bench(&clock, &mut kernel, 16, 5, 0.0);
    assert_eq!(per_call, 1024.0);
    assert_eq!(per_call / 256.0, 4.0);
}

/// Kernel whose per-call cost changes with each interval of `internal` calls
fn scheduled_kernel<'a>(
    ticks: &'a Cell<f64>,
    calls: &'a Cell<u64>,
    internal: u64,
    costs: &'a [f64],
) -> impl FnMut() + 'a {
    move || {
        let trial = (calls.get() / internal) as usize;
        calls.set(calls.get() + 1);
        ticks.set(ticks.get() + costs[trial % costs.len()]);
    }
}

#[test]
fn test_run_bench_keeps_fastest_interval() {
    let ticks = Cell::new(0.0);
    let calls = Cell::new(0);
    let clock = TickClock { ticks: &ticks };
    // Intervals of 4 calls last 20, 12 and 16 ticks
    let mut kernel = scheduled_kernel(&ticks, &calls, 4, &[5.0, 3.0, 4.0]);

    let per_call = run_bench(&clock, &mut kernel, 4, 3, 0.5);
    // min 12 / 4 calls - 0.5; first, mean and max would give 4.5, 3.5, 4.5
    assert_eq!(per_call, 2.5);
    assert_eq!(calls.get(), 12);
}

#[test]
fn test_cycles_per_element_divides_fastest_interval_by_size() {
    let ticks = Cell::new(0.0);
    let calls = Cell::new(0);
    let clock = TickClock { ticks: &ticks };
    let mut kernel = scheduled_kernel(&ticks, &calls, 2, &[900.0, 1000.0, 600.0, 800.0]);

    let cpe = cycles_per_element(&clock, &mut kernel, 2, 4, 100.0, 250);
    // (1200 / 2 - 100) / 250
    assert_eq!(cpe, 2.0);
}

#[test]
fn test_run_bench_subtracts_overhead() {
    let ticks = Cell::new(0.0);
    let clock = TickClock { ticks: &ticks };
    let mut kernel = || ticks.set(ticks.get() + 10.0);

    assert_eq!(run_bench(&clock, &mut kernel, 8, 3, 2.5), 7.5);
}

#[test]
fn test_loop_overhead_of_frozen_clock_is_zero() {
    let ticks = Cell::new(5.0);
    let clock = TickClock { ticks: &ticks };
    assert_eq!(loop_overhead(&clock, 3), 0.0);
}

#[test]
fn test_calibrate_with_real_clock_reaches_goal() {
    let clock = crate::clock::WallSeconds::new();
    let mut acc = 0.0f64;
    let mut kernel = || {
        for i in 0..64 {
            acc = std::hint::black_box(acc + f64::from(i).sqrt());
        }
    };
    let goal = 1.0e-4;
    let calibration = calibrate(&clock, &mut kernel, goal, 3);
    assert!(calibration.internal_count >= 1);
    assert!(calibration.elapsed >= goal);
}

proptest! {
    #[test]
    fn prop_calibrated_count_is_smallest_power_of_two(cost in 1u32..100, goal in 1u32..10_000) {
        let (cost, goal) = (f64::from(cost), f64::from(goal));
        let ticks = Cell::new(0.0);
        let clock = TickClock { ticks: &ticks };
        let mut kernel = || ticks.set(ticks.get() + cost);

        let calibration = calibrate(&clock, &mut kernel, goal, 3);
        prop_assert_eq!(calibration.internal_count, smallest_power_of_two_reaching(cost, goal));
        prop_assert!(calibration.elapsed >= goal);
    }

    #[test]
    fn prop_align_slice_lands_on_cache_line(start in 0usize..8, n in 1usize..300) {
        let base = vec![0.0f64; n + PADDING + 8];
        let view = &base[start..];
        let aligned = align_slice(view, n).unwrap();
        prop_assert_eq!(cache_line_offset(aligned), 0);
        prop_assert_eq!(aligned.len(), n + SLACK);
    }
}

// ============================================================================
// alignment
// ============================================================================

#[test]
fn test_misaligned_view_is_corrected() {
    let base = vec![1.0f64; 128];
    let view = &base[1..];
    // an f64 vector starts on at least an 8 byte boundary
    assert_ne!(cache_line_offset(view), cache_line_offset(&base[..]));
    let aligned = align_slice(view, 64).unwrap();
    assert_eq!(cache_line_offset(aligned), 0);
}

#[test]
fn test_align_slice_rejects_short_buffer() {
    let base = vec![0.0f64; 4];
    assert!(matches!(
        align_slice(&base, 100),
        Err(BenchError::AlignmentError { .. })
    ));
}

#[test]
fn test_operands_are_aligned_after_fix() {
    let mut rng = StdRng::seed_from_u64(7);
    let n = 1000;
    let mut operands = Operands::new(n, &mut rng);
    operands.align(n).unwrap();
    assert!(operands.is_aligned());
    assert_eq!(operands.x.as_slice().len(), n + SLACK);
    assert!(operands.x.as_slice().iter().all(|v| (0.1..0.9).contains(v)));
    assert!(operands.y.as_slice().iter().all(|v| (1.1..1.9).contains(v)));
    assert!(operands.z.as_slice().iter().all(|v| (2.1..2.9).contains(v)));
}

#[test]
fn test_operand_windows_move_by_whole_elements() {
    let mut buffer = OperandBuffer::from_vec((0..100).map(f64::from).collect());
    let shift = buffer.align(32).unwrap();
    let w0 = buffer.window(0, 8);
    let w2 = buffer.window(2, 8);
    assert_eq!(w0[0], shift as f64);
    assert_eq!(w2[0], (shift + 2) as f64);
    assert_eq!(cache_line_offset(w2), 2 * std::mem::size_of::<f64>());
    buffer.window_mut(1, 4).fill(-1.0);
    assert_eq!(buffer.window(0, 6), &[shift as f64, -1.0, -1.0, -1.0, -1.0, (shift + 5) as f64]);
}

// ============================================================================
// functions and expressions
// ============================================================================

#[test]
fn test_function_names_resolve_by_length() {
    assert_eq!("+".parse::<Function>().unwrap(), Function::Binary(BinaryOp::Add));
    assert_eq!("/".parse::<Function>().unwrap(), Function::Binary(BinaryOp::Div));
    assert_eq!("exp2".parse::<Function>().unwrap(), Function::Unary(UnaryFunc::Exp2));
    assert!("**".parse::<Function>().is_err());
    assert!("gamma".parse::<Function>().is_err());
    for name in DEFAULT_FUNCS {
        assert_eq!(name.parse::<Function>().unwrap().to_string(), name);
    }
}

#[test]
fn test_layout_labels() {
    assert_eq!(OperandLayout::ArrayArray.label(BinaryOp::Add), " array+array");
    assert_eq!(OperandLayout::ArrayScalar.label(BinaryOp::Mul), "array*scalar");
    assert_eq!(OperandLayout::ScalarArray.label(BinaryOp::Sub), "scalar-array");
    assert_eq!(
        OperandLayout::ScalarArray.offset_label(BinaryOp::Div, 1, 2, 4),
        "C[1:]=scalar/A[4:]"
    );
}

#[test]
fn test_scalar_array_pairs_x0_with_y_window() {
    let x = [0.5, 0.6];
    let y = [1.5, 1.6];
    let (a, b) = Operand::pair(OperandLayout::ScalarArray, &x, &y);
    assert!(matches!(a, Operand::Scalar(v) if v == 0.5));
    assert!(matches!(b, Operand::Array(s) if s == y));
    let (_, b) = Operand::pair(OperandLayout::ArrayScalar, &x, &y);
    assert!(matches!(b, Operand::Scalar(v) if v == 1.5));
}

#[test]
fn test_expr_binary_and_precedence() {
    let mut program = Program::compile("x + y * 2 - -x", &["x", "y"]).unwrap();
    let x = [1.0, 2.0, 3.0];
    let y = [10.0, 20.0, 30.0];
    let mut out = [0.0; 3];
    program.eval(&[Operand::Array(&x), Operand::Array(&y)], &mut out);
    assert_eq!(out, [22.0, 44.0, 66.0]);

    program.eval(&[Operand::Array(&x), Operand::Scalar(0.5)], &mut out);
    assert_eq!(out, [3.0, 5.0, 7.0]);
}

#[test]
fn test_expr_spans_multiple_blocks() {
    let n = expr::BLOCK_SIZE * 2 + 17;
    let x: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    let mut out = vec![0.0; n];
    let mut program = Program::compile(&ExprBackend::unary_source(UnaryFunc::Invsqrt), &["x"]).unwrap();
    program.eval(&[Operand::Array(&x)], &mut out);
    for (o, v) in out.iter().zip(&x) {
        assert!((o - 1.0 / v.sqrt()).abs() < 1e-15);
    }
}

#[test]
fn test_expr_rejects_bad_sources() {
    for src in ["copyto(x)", "gamma(x)", "x +", "z", "(x", "x $ y", "x y"] {
        let err = Program::compile(src, &["x", "y"]).unwrap_err();
        assert!(
            matches!(err, BenchError::ExpressionError { .. }),
            "{src}: {err}"
        );
    }
}

// ============================================================================
// backends
// ============================================================================

fn all_backends() -> Vec<Box<dyn ElementwiseBackend>> {
    let mut backends: Vec<Box<dyn ElementwiseBackend>> = backend::DEFAULT_BACKENDS
        .iter()
        .map(|name| create(name, BackendOptions::default()).unwrap())
        .collect();
    backends.push(Box::new(
        KernelBackend::new(BackendOptions {
            threads: Some(1),
            fast_math: true,
        })
        .unwrap(),
    ));
    backends.push(Box::new(
        KernelBackend::new(BackendOptions {
            threads: Some(2),
            fast_math: false,
        })
        .unwrap(),
    ));
    backends
}

#[test]
fn test_unknown_backend_is_unavailable() {
    assert!(matches!(
        create("numpy", BackendOptions::default()),
        Err(BenchError::BackendUnavailable { .. })
    ));
}

#[test]
fn test_kernel_backend_thread_selection() {
    let single = KernelBackend::new(BackendOptions {
        threads: Some(1),
        fast_math: false,
    })
    .unwrap();
    assert!(!single.is_parallel());
    assert_eq!(single.threads(), 1);

    let pooled = KernelBackend::new(BackendOptions {
        threads: Some(3),
        fast_math: false,
    })
    .unwrap();
    assert!(pooled.is_parallel());
    assert_eq!(pooled.threads(), 3);
}

#[test]
fn test_backends_agree_on_unary_functions() {
    let n = 37;
    let x: Vec<f64> = (0..n).map(|i| 0.1 + 0.02 * i as f64).collect();
    let y: Vec<f64> = x.iter().map(|v| v + 1.0).collect();

    for backend in all_backends() {
        for func in UnaryFunc::ALL {
            let mut kernel = match backend.unary(func) {
                Ok(kernel) => kernel,
                Err(BenchError::UnsupportedOperation { .. }) if backend.name() == "ndarray" => continue,
                Err(_) if backend.name() == "expr" && func == UnaryFunc::Copyto => continue,
                Err(e) => panic!("{} {}: {e}", backend.name(), func.name()),
            };
            let input = if func.needs_input_above_one() { &y } else { &x };
            let mut out = vec![0.0; n];
            kernel(input, &mut out);
            let f = func.scalar_fn();
            for (o, &v) in out.iter().zip(input.iter()) {
                let expected = f(v);
                assert!(
                    (o - expected).abs() <= 1e-12 * expected.abs().max(1.0),
                    "{} {}: {o} != {expected}",
                    backend.name(),
                    func.name()
                );
            }
        }
    }
}

#[test]
fn test_backends_agree_on_binary_layouts() {
    let n = 29;
    let x: Vec<f64> = (0..n).map(|i| 0.1 + 0.01 * i as f64).collect();
    let y: Vec<f64> = (0..n).map(|i| 1.1 + 0.03 * i as f64).collect();

    for backend in all_backends() {
        for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div] {
            for layout in OperandLayout::ALL {
                let mut kernel = backend.binary(op).unwrap();
                let (a, b) = Operand::pair(layout, &x, &y);
                let mut out = vec![0.0; n];
                kernel(a, b, &mut out);
                for i in 0..n {
                    let expected = match layout {
                        OperandLayout::ArrayArray => op.apply(x[i], y[i]),
                        OperandLayout::ArrayScalar => op.apply(x[i], y[0]),
                        OperandLayout::ScalarArray => op.apply(x[0], y[i]),
                    };
                    assert_eq!(out[i], expected, "{} {:?} {:?}", backend.name(), op, layout);
                }
            }
        }
    }
}

#[test]
fn test_ndarray_has_no_erf_or_invsqrt() {
    let backend = create("ndarray", BackendOptions::default()).unwrap();
    for func in [UnaryFunc::Erf, UnaryFunc::Invsqrt] {
        assert!(matches!(
            backend.unary(func),
            Err(BenchError::UnsupportedOperation { .. })
        ));
    }
}

// ============================================================================
// configuration and report
// ============================================================================

#[test]
fn test_default_config_matches_reference_defaults() {
    let config = UmathConfig::default();
    assert_eq!(config.prefix, "@");
    assert_eq!(config.sizes, vec![1000, 8000, 32000, 100_000, 1_000_000, 2_500_000]);
    assert_eq!(config.offsets, vec![0, 1, 2, 4]);
    assert_eq!(config.repeats, 30);
    assert_eq!(config.goal_time_ms, 1.0);
    assert_eq!(config.impls, vec!["std", "ndarray", "expr", "kernel"]);
    assert_eq!(config.funcs.len(), 26);
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_bad_parameters() {
    let cases = [
        UmathConfig::new().with_offsets(vec![0, SLACK + 1]),
        UmathConfig::new().with_offsets(vec![]),
        UmathConfig::new().with_sizes(vec![100, 0]),
        UmathConfig::new().with_repeats(0),
        UmathConfig::new().with_goal_time_ms(0.0),
        UmathConfig::new().with_goal_time_ms(f64::NAN),
    ];
    for config in cases {
        assert!(matches!(config.validate(), Err(BenchError::ConfigError { .. })), "{config:?}");
    }
    assert!(UmathConfig::new().with_offsets(vec![SLACK]).validate().is_ok());
}

#[test]
fn test_result_row_render() {
    let row = ResultRow {
        implementation: "std".to_string(),
        label: " array+array".to_string(),
        iterations: 128,
        size: 1000,
        cpe_aligned: 1.234,
        cpe_max: 2.5,
    };
    assert_eq!(
        row.render("@"),
        "@,     std,  array+array, float64,     128,    1000,   1.23,   2.50"
    );
}

#[test]
fn test_failure_line_names_function_and_backend() {
    let err = BenchError::unsupported("invsqrt", "no mapping");
    assert_eq!(
        failure_line("invsqrt", "ndarray", &err),
        "Failed while executing invsqrt for ndarray: Unsupported operation 'invsqrt': no mapping"
    );
}

// ============================================================================
// end to end
// ============================================================================

#[test]
fn test_run_prints_overhead_and_header() {
    let text = run_to_string(small_config().with_funcs(["sqrt"]).with_impls(["std"]));
    let mut lines = text.lines();
    let overhead = lines.next().unwrap();
    assert!(overhead.starts_with("Overhead time per loop iteration =  "));
    assert!(overhead.contains("  clock =  wall clock x 2e9"));
    assert_eq!(lines.next().unwrap(), HEADER);
    let row = text.lines().find(|l| l.starts_with("@,")).unwrap();
    let fields: Vec<&str> = row.split(", ").collect();
    assert_eq!(fields.len(), 8);
    assert_eq!(fields[1].trim(), "std");
    assert_eq!(fields[2].trim(), "sqrt");
    assert_eq!(fields[3], "float64");
    assert_eq!(fields[5].trim(), "64");
}

#[test]
fn test_binary_operator_reports_three_layouts() {
    let text = run_to_string(small_config().with_funcs(["*"]).with_impls(["kernel"]));
    let labels: Vec<&str> = text
        .lines()
        .filter(|l| l.starts_with("@,"))
        .map(|l| l.split(", ").nth(2).unwrap())
        .collect();
    assert_eq!(labels, vec![" array*array", "array*scalar", "scalar*array"]);
}

#[test]
fn test_unmapped_function_is_isolated() {
    let text = run_to_string(
        small_config()
            .with_funcs(["invsqrt", "sqrt"])
            .with_impls(["ndarray", "expr"]),
    );
    let failures: Vec<&str> = text.lines().filter(|l| l.starts_with("Failed while executing")).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].starts_with("Failed while executing invsqrt for ndarray: "));

    let rows: Vec<(&str, &str)> = text
        .lines()
        .filter(|l| l.starts_with("@,"))
        .map(|l| {
            let mut f = l.split(", ").skip(1);
            (f.next().unwrap().trim(), f.next().unwrap().trim())
        })
        .collect();
    assert_eq!(rows, vec![("ndarray", "sqrt"), ("expr", "invsqrt"), ("expr", "sqrt")]);
}

#[test]
fn test_unknown_backend_and_function_fail_per_configuration() {
    let text = run_to_string(
        small_config()
            .with_funcs(["sin", "gamma"])
            .with_impls(["numpy", "std"]),
    );
    assert!(text.contains("Failed while executing sin for numpy: "));
    assert!(text.contains("Failed while executing gamma for numpy: "));
    assert!(text.contains("Failed while executing gamma for std: "));
    assert_eq!(text.lines().filter(|l| l.starts_with("@,")).count(), 1);
}

#[test]
fn test_verbose_prints_every_offset_combination() {
    let text = run_to_string(
        small_config()
            .with_funcs(["cos", "+"])
            .with_impls(["std"])
            .with_verbose(true),
    );
    let unary: Vec<&str> = text.lines().filter(|l| l.contains("c[")).collect();
    assert_eq!(unary.len(), 4);
    assert!(unary[0].contains("c[1:]=    cos(a[1:])"));
    let binary: Vec<&str> = text.lines().filter(|l| l.contains("C[")).collect();
    assert_eq!(binary.len(), 3 * 8);
    assert!(!text.contains("warning:"));
}

#[test]
fn test_invalid_config_fails_before_output() {
    let config = small_config().with_offsets(vec![32]);
    assert!(matches!(run(config, Vec::new()), Err(BenchError::ConfigError { .. })));
}

// ============================================================================
// backend lifetime
// ============================================================================

/// Log sink shared between the subscriber and the test
#[derive(Clone, Default)]
struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl Write for SharedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_backends_created_once_per_sweep() {
    let log = SharedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let config = small_config()
        .with_sizes(vec![64, 128, 256])
        .with_funcs(["sqrt", "+"])
        .with_impls(["kernel", "nope"])
        .with_backend_options(BackendOptions {
            threads: Some(2),
            fast_math: false,
        });
    let text = tracing::subscriber::with_default(subscriber, || run_to_string(config));

    let logged = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    assert_eq!(logged.matches("kernel backend ready").count(), 1);
    assert_eq!(text.lines().filter(|l| l.starts_with("@,")).count(), 3 * 4);
    assert_eq!(text.matches("for nope").count(), 3 * 2);
}
