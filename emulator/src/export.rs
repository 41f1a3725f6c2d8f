//! Run export: the bench's CSV layout and a JSON report.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use cycler_core::run::{CycleSummary, PhaseRecord, Run, Sample};
use serde::Serialize;

pub const CSV_HEADER: &str =
    "cycle_no,status,t [s],V [V],I [A],P [W],mode,cap_charge [Ahr],cap_discharge [Ahr]";

/// Writes one row per sample under [`CSV_HEADER`].
pub fn write_csv<W: Write>(run: &Run, writer: W) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);

    writeln!(writer, "{CSV_HEADER}")?;
    for sample in run.samples() {
        writeln!(
            writer,
            "{},{},{:.3},{:.4},{:.4},{},{},{:.6},{:.6}",
            sample.cycle,
            sample.phase,
            sample.elapsed_s,
            sample.voltage,
            sample.current,
            sample.power_w.map(|w| format!("{w:.4}")).unwrap_or_default(),
            sample.source_mode.map(|m| m.label()).unwrap_or_default(),
            sample.charge_ah,
            sample.discharge_ah,
        )?;
    }

    writer.flush()
}

pub fn write_csv_file(run: &Run, path: &Path) -> io::Result<()> {
    write_csv(run, File::create(path)?)
}

#[derive(Serialize)]
struct Report<'a> {
    cycles: Vec<CycleSummary>,
    phases: &'a [PhaseRecord],
    samples: &'a [Sample],
}

/// Writes the samples, phase records and per-cycle totals as one JSON document.
pub fn write_json<W: Write>(run: &Run, writer: W) -> serde_json::Result<()> {
    let report = Report {
        cycles: run.cycle_summaries(),
        phases: run.phases(),
        samples: run.samples(),
    };
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush().map_err(serde_json::Error::io)
}

pub fn write_json_file(run: &Run, path: &Path) -> io::Result<()> {
    write_json(run, File::create(path)?).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cycler_core::instruments::RegulationMode;
    use cycler_core::phases::{Phase, PhaseExit};
    use cycler_core::run::{PhaseSample, RunRecorder};

    use super::*;

    fn sample_run() -> Run {
        let mut recorder = RunRecorder::new();
        recorder.begin_cycle(1);
        recorder.begin_phase(Phase::ConstantCurrentCharge, Duration::ZERO);
        recorder.record(PhaseSample {
            phase_elapsed: Duration::ZERO,
            voltage: 3.3,
            current: 1.5,
            charge_ah: 0.0,
            discharge_ah: 0.0,
            capacity_delta_ah: 0.0,
            power_w: Some(4.95),
            source_mode: Some(RegulationMode::ConstantCurrent),
        });
        recorder.end_phase(Duration::from_secs(10), PhaseExit::UpperVoltageReached);
        recorder.begin_phase(Phase::ConstantCurrentDischarge, Duration::from_secs(10));
        recorder.record(PhaseSample {
            phase_elapsed: Duration::ZERO,
            voltage: 3.2,
            current: 2.0,
            charge_ah: 0.0,
            discharge_ah: 0.0,
            capacity_delta_ah: 0.0,
            power_w: None,
            source_mode: None,
        });
        recorder.finish()
    }

    #[test]
    fn csv_rows_follow_header() {
        let mut out = Vec::new();
        write_csv(&sample_run(), &mut out).expect("csv");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "1,constant_current_charge,0.000,3.3000,1.5000,4.9500,CC,0.000000,0.000000"
        );
        assert_eq!(
            lines[2],
            "1,constant_current_discharge,10.000,3.2000,2.0000,,,0.000000,0.000000"
        );
    }

    #[test]
    fn json_report_carries_cycle_totals() {
        let mut out = Vec::new();
        write_json(&sample_run(), &mut out).expect("json");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("parse");
        assert_eq!(value["samples"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["phases"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["cycles"][0]["cycle"], 1);
        assert_eq!(value["samples"][0]["phase"], "constant_current_charge");
    }
}
