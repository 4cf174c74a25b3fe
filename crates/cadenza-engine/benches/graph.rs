use std::sync::Arc;
use std::time::Duration;

use cadenza_engine::{Context, GainNode, OfflineRenderer, OscillatorNode, OscillatorShape};
use criterion::{criterion_group, criterion_main, Criterion};

fn wide_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(30);

    group.bench_function("32_voices_48k", |b| {
        let context = Context::new(48_000.0).expect("context");
        let destination = context.destination();

        for voice in 0..32 {
            let oscillator = OscillatorNode::new(&context, OscillatorShape::Sawtooth).expect("osc");
            oscillator
                .frequency()
                .set_value(55.0 * (voice + 1) as f32)
                .expect("frequency");
            let gain = GainNode::new(&context).expect("gain");
            gain.gain().set_value(1.0 / 32.0).expect("gain value");
            oscillator.node().connect(0, gain.node(), 0).expect("connect");
            gain.node().connect(0, &destination, 0).expect("connect");
            oscillator.start(0.0).expect("start");
        }

        let mut renderer = OfflineRenderer::new(Arc::clone(&context));
        let mut output = vec![vec![0.0f32; 128]; 2];

        b.iter(|| {
            renderer.render(&mut output, 128).expect("render");
        });
    });

    group.finish();
}

criterion_group!(benches, wide_graph);
criterion_main!(benches);
