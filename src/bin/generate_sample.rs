//! Writes `sample_data.parquet` with synthetic spectra, imports it into a
//! fresh `sample.lineage` store, and records one normalisation sweep so the
//! store has something under `process/` to inspect.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use lineage::process::{self, ApplyRequest, Criteria, Func};
use lineage::{import, Array, Decline, Store};

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn generate_spectrum(
    wavenumbers: &[f64],
    peaks: &[(f64, f64, f64)],
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavenumbers
        .iter()
        .map(|&wn| {
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wn, mu, sigma, amp))
                .sum();
            signal + rng.gauss(0.0, noise_level)
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn f64_lists(rows: &[Vec<f64>]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn write_parquet(path: &Path, rng: &mut SimpleRng) -> Result<usize> {
    // Wavenumbers: 4000 → 3002, step 2
    let wavenumbers: Vec<f64> = (0..500).map(|i| 4000.0 - i as f64 * 2.0).collect();
    let sample_peaks = [
        ("Sample_A", [(3800.0, 40.0, 0.8), (3400.0, 30.0, 0.3)]),
        ("Sample_B", [(3600.0, 50.0, 0.6), (3200.0, 35.0, 0.7)]),
    ];
    let concentrations = [0.5, 2.0];

    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut samples = Vec::new();
    let mut concs = Vec::new();
    for (sample, base) in &sample_peaks {
        for &conc in &concentrations {
            let peaks: Vec<(f64, f64, f64)> = base
                .iter()
                .map(|&(mu, sigma, amp)| (mu, sigma, amp * conc))
                .collect();
            xs.push(wavenumbers.clone());
            ys.push(generate_spectrum(&wavenumbers, &peaks, 0.005 * conc, rng));
            samples.push(*sample);
            concs.push(conc);
        }
    }
    let ids: Vec<i64> = (0..xs.len() as i64).collect();

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("sample", DataType::Utf8, false),
        Field::new("concentration", DataType::Float64, false),
        Field::new("measurement_id", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(f64_lists(&xs)),
            Arc::new(f64_lists(&ys)),
            Arc::new(StringArray::from(samples)),
            Arc::new(Float64Array::from(concs)),
            Arc::new(Int64Array::from(ids)),
        ],
    )
    .context("building record batch")?;

    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(xs.len())
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    let table_path = Path::new("sample_data.parquet");
    let rows = write_parquet(table_path, &mut rng)?;
    println!("Wrote {rows} spectra to {}", table_path.display());

    let store_path = Path::new("sample.lineage");
    if store_path.exists() {
        std::fs::remove_file(store_path).context("removing previous sample store")?;
    }
    let mut store = Store::create(store_path).context("creating sample store")?;
    import::import_table(&mut store, table_path)?;
    store.close()?;

    let normalize = Func::new("normalize", |inputs: &[Array], _| {
        let y = inputs.first().context("expected one input")?;
        let peak = y.data().iter().fold(f64::MIN, |m, v| m.max(*v));
        Ok(Some(vec![y.map(|v| v / peak).into()]))
    })
    .in_module("demo");
    let summary = process::run(
        store_path,
        &normalize,
        &Criteria::from("datasets/*/y"),
        None,
        &ApplyRequest::default(),
        &Decline,
        &mut |_| {},
    )?;

    println!(
        "Stored {rows} spectra in {} and normalised them into {}",
        store_path.display(),
        summary
            .operation
            .map(|f| f.to_string())
            .unwrap_or_else(|| "nothing".into())
    );
    Ok(())
}
