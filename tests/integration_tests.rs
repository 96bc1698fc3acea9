use gramflow::*;

const SALES_CSV: &str = "\
region,product,month,sales
north,a,1,10
south,a,1,5
north,b,2,7
south,b,2,
north,a,3,3
";

/// Helper function to load inline CSV and run a mark over a single facet
fn run_csv(csv: &str, options: MarkOptions) -> MarkState {
    let data = Data::from_csv(csv.as_bytes()).expect("Failed to parse CSV");
    run(data, options, None)
}

fn run(data: Data, options: MarkOptions, facets: Option<Facets>) -> MarkState {
    let mark = Mark::new(data, options).expect("Failed to build mark");
    mark.initialize(facets).expect("Failed to initialize mark")
}

fn nums(v: &[f64]) -> Vec<Value> {
    v.iter().map(|&x| Value::from(x)).collect()
}

fn texts(v: &[&str]) -> Vec<Value> {
    v.iter().map(|&s| Value::from(s)).collect()
}

#[test]
fn test_csv_cells_are_typed() {
    let data = Data::from_csv(SALES_CSV.as_bytes()).unwrap();
    assert_eq!(data.len(), 5);
    assert_eq!(data[0].get("region"), Some(&Value::from("north")));
    assert_eq!(data[0].get("sales"), Some(&Value::from(10.0)));
    assert_eq!(data[3].get("sales"), Some(&Value::Null));
}

#[test]
fn test_group_counts_in_first_seen_order() {
    let data: Data = nums(&[1.0, 1.0, 2.0, 2.0, 2.0, 3.0]).into();
    let options = group_x(Outputs::new().with("y", Reduce::Count), MarkOptions::new()).unwrap();
    let state = run(data, options, None);

    assert_eq!(state.facets, vec![vec![0, 1, 2]]);
    assert_eq!(state.channels["x"].value, nums(&[1.0, 2.0, 3.0]));
    assert_eq!(state.channels["y"].value, nums(&[2.0, 3.0, 1.0]));
    assert_eq!(state.channels["y"].label.as_deref(), Some("Frequency"));
}

#[test]
fn test_group_sum_from_csv() {
    let options = MarkOptions::new().channel("x", "region").channel("y", "sales");
    let options = group_x(Outputs::new().with("y", "sum".parse().unwrap()), options).unwrap();
    let state = run_csv(SALES_CSV, options);

    assert_eq!(state.channels["x"].value, texts(&["north", "south"]));
    assert_eq!(state.channels["y"].value, nums(&[20.0, 5.0]));
    assert_eq!(state.channels["y"].label.as_deref(), Some("sales"));
}

#[test]
fn test_group_preserves_facet_order() {
    let data: Data = texts(&["a", "b", "a", "c", "c"]).into();
    let options = group_x(Outputs::new().with("y", Reduce::Count), MarkOptions::new()).unwrap();
    let state = run(data, options, Some(vec![vec![3, 4], vec![0, 1, 2]]));

    assert_eq!(state.facets, vec![vec![0], vec![1, 2]]);
    assert_eq!(state.channels["x"].value, texts(&["c", "a", "b"]));
    assert_eq!(state.channels["y"].value, nums(&[2.0, 2.0, 1.0]));
}

#[test]
fn test_stack_diverging_values() {
    let data: Data = nums(&[3.0, -1.0, 2.0]).into();
    let options = MarkOptions::new().channel("y", ValueSpec::Identity);
    let options = stack_y(StackOptions::default(), options).unwrap();
    let state = run(data, options, None);

    assert_eq!(state.channels["y1"].value, nums(&[0.0, 0.0, 3.0]));
    assert_eq!(state.channels["y2"].value, nums(&[3.0, -1.0, 5.0]));
    assert_eq!(state.channels["y"].value, nums(&[1.5, -0.5, 4.0]));
}

#[test]
fn test_stack_expand_spans_unit_interval() {
    let options = MarkOptions::new()
        .channel("x", "month")
        .channel("y", "sales")
        .channel("fill", "product");
    let options = stack_y(StackOptions::default().with_offset(StackOffset::Expand), options).unwrap();
    let state = run_csv("month,product,sales\n1,a,1\n1,b,3\n2,a,2\n2,b,2\n", options);

    assert_eq!(state.channels["y1"].value, nums(&[0.0, 0.25, 0.0, 0.5]));
    assert_eq!(state.channels["y2"].value, nums(&[0.25, 1.0, 0.5, 1.0]));
}

#[test]
fn test_stack_preserves_facets() {
    let data: Data = nums(&[1.0, 2.0, 3.0, 4.0]).into();
    let options = MarkOptions::new().channel("y", ValueSpec::Identity);
    let options = stack_y(StackOptions::default(), options).unwrap();
    let facets = vec![vec![2, 3], vec![0, 1]];
    let state = run(data, options, Some(facets.clone()));

    assert_eq!(state.facets, facets);
    assert_eq!(state.channels["y1"].value, nums(&[0.0, 1.0, 0.0, 3.0]));
}

#[test]
fn test_binned_histogram_stacked_by_series() {
    let csv = "v,g\n1,a\n2,b\n12,a\n15,a\n3,b\n";
    let interval: Interval = "10".parse().unwrap();
    let options = MarkOptions::new().channel("x", "v").channel("fill", "g");
    let options = bin_x(
        Outputs::new().with("y", Reduce::Count),
        BinOptions::default().with_interval(interval),
        options,
    )
    .unwrap();
    let options = stack_y(StackOptions::default(), options).unwrap();
    let state = run_csv(csv, options);

    assert_eq!(state.channels["x1"].value, nums(&[0.0, 10.0, 0.0]));
    assert_eq!(state.channels["x2"].value, nums(&[10.0, 20.0, 10.0]));
    assert_eq!(state.channels["fill"].value, texts(&["a", "a", "b"]));
    assert_eq!(state.channels["y1"].value, nums(&[0.0, 0.0, 1.0]));
    assert_eq!(state.channels["y2"].value, nums(&[1.0, 2.0, 3.0]));
}

#[test]
fn test_cumulative_bins_end_at_total() {
    let values = [1.0, 3.0, 4.0, 7.0, 8.0, 9.0, 12.0];
    let data: Data = nums(&values).into();
    let bins = BinOptions::default()
        .with_thresholds(Thresholds::Values(nums(&[0.0, 5.0, 10.0, 15.0])))
        .with_cumulative(1);
    let options = bin_x(Outputs::new().with("y", Reduce::Count).without_filter(), bins, MarkOptions::new()).unwrap();
    let state = run(data, options, None);

    assert_eq!(state.channels["y"].value, nums(&[3.0, 6.0, 7.0]));
    assert_eq!(state.channels["y"].value.last(), Some(&Value::from(values.len())));
}

#[test]
fn test_window_strict_and_lenient() {
    let data: Data = nums(&[1.0, 2.0, 3.0, 4.0, 5.0]).into();
    let options = MarkOptions::new().channel("y", ValueSpec::Identity);

    let lenient = window_y(WindowOptions::new(3), options.clone()).unwrap();
    let state = run(data.clone(), lenient, None);
    assert_eq!(state.channels["y"].value, nums(&[1.5, 2.0, 3.0, 4.0, 4.5]));

    let strict = window_y(WindowOptions::new(3).with_strict(true), options).unwrap();
    let state = run(data, strict, None);
    let mut expected = nums(&[2.0, 3.0, 4.0]);
    expected.insert(0, Value::Null);
    expected.push(Value::Null);
    assert_eq!(state.channels["y"].value, expected);
}

#[test]
fn test_normalize_each_series_to_first() {
    let options = MarkOptions::new()
        .channel("x", "month")
        .channel("y", "sales")
        .channel("stroke", "product");
    let options = normalize_y(Basis::First, options).unwrap();
    let state = run_csv("month,product,sales\n1,a,2\n1,b,5\n2,a,4\n2,b,10\n", options);

    assert_eq!(state.channels["y"].value, nums(&[1.0, 1.0, 2.0, 2.0]));
}

#[test]
fn test_select_maximum_per_series() {
    let options = MarkOptions::new()
        .channel("x", "month")
        .channel("y", "sales")
        .channel("z", "region");
    let options = select_max_y(options).unwrap();
    let state = run_csv(SALES_CSV, options);

    assert_eq!(state.facets, vec![vec![0, 1]]);
}

#[test]
fn test_exclusive_facets_are_untouched_when_disjoint() {
    let data: Data = nums(&[1.0, 2.0, 3.0]).into();
    let frame = Frame::new(data.clone(), vec![vec![0, 2], vec![1]]);
    let out = exclusive(frame);
    assert!(Data::ptr_eq(&out.data, &data));
    assert_eq!(out.facets, vec![vec![0, 2], vec![1]]);

    let out = exclusive(Frame::new(data, vec![vec![0, 1], vec![1]]));
    assert_eq!(out.facets, vec![vec![0, 1], vec![3]]);
    assert_eq!(out.data.len(), 4);
}

#[test]
fn test_explicit_transform_overrides_shorthands() {
    let data: Data = nums(&[1.0, 0.0, 2.0]).into();
    let identity = Transform::new(|frame, _| Ok(frame));
    let options = MarkOptions::new()
        .with_filter(ValueSpec::Identity)
        .with_reverse(true)
        .with_transform(identity);
    let options = basic(options, None).unwrap();
    assert!(options.filter.is_none());
    let state = run(data.clone(), options, None);
    assert_eq!(state.facets, vec![vec![0, 1, 2]]);

    let options = MarkOptions::new().with_filter(ValueSpec::Identity).with_reverse(true);
    let state = run(data, basic(options, None).unwrap(), None);
    assert_eq!(state.facets, vec![vec![2, 0]]);
}

#[test]
fn test_mark_sorts_by_channel() {
    let options = MarkOptions::new()
        .channel("x", "region")
        .channel("y", "sales")
        .with_sort(SortSpec::channel("-y"));
    let data = Data::from_csv(SALES_CSV.as_bytes()).unwrap();
    let mark = Mark::new(data, options).unwrap();
    let state = mark.initialize(None).unwrap();
    let state = mark.apply_initializer(state, &Scales::new()).unwrap();
    assert_eq!(state.facets, vec![vec![0, 2, 1, 4, 3]]);
}

#[test]
fn test_stack_over_overlapping_facets() {
    let data: Data = nums(&[1.0, 2.0, 3.0]).into();
    let options = MarkOptions::new().channel("y", ValueSpec::Identity);
    let options = stack_y(StackOptions::default(), options).unwrap();
    let state = run(data, options, Some(vec![vec![0, 1], vec![1, 2]]));

    assert_eq!(state.facets, vec![vec![0, 1], vec![3, 2]]);
    assert_eq!(state.channels["y1"].value, nums(&[0.0, 1.0, 2.0, 0.0]));
    assert_eq!(state.channels["y2"].value, nums(&[1.0, 3.0, 5.0, 2.0]));
}

#[test]
fn test_seeded_shuffle_is_reproducible() {
    let data: Data = (0..20).map(Value::from).collect();
    let shuffled = || {
        let options = shuffle(ShuffleOptions { seed: Some(42.0) }, MarkOptions::new()).unwrap();
        run(data.clone(), options, None).facets
    };
    let first = shuffled();
    assert_eq!(first, shuffled());

    let mut sorted = first[0].clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..20).collect::<Vec<_>>());
}

#[test]
fn test_transform_after_initializer_fails() {
    let noop = Initializer::new(|_, _, _| Ok(InitializerOutput::default()));
    let options = MarkOptions::new().channel("x", "v").with_initializer(noop);
    let err = group_x(Outputs::new().with("y", Reduce::Count), options).unwrap_err();
    assert_eq!(
        err.downcast_ref::<PipelineError>(),
        Some(&PipelineError::TransformAfterInitializer)
    );
}

#[test]
fn test_options_from_json() {
    let stack: StackOptions =
        serde_json::from_str(r#"{"offset": "expand", "order": "appearance", "reverse": true}"#).unwrap();
    assert!(matches!(stack.offset, Some(StackOffset::Expand)));
    assert!(stack.reverse);

    let window: WindowOptions =
        serde_json::from_str(r#"{"k": 3, "anchor": "end", "reduce": "p90", "strict": true}"#).unwrap();
    assert_eq!(window.k, 3);
    assert_eq!(window.anchor, Anchor::End);
    assert!(window.strict);

    let bins: BinOptions = serde_json::from_str(r#"{"thresholds": "sturges", "cumulative": -1}"#).unwrap();
    assert!(matches!(bins.thresholds, Thresholds::Sturges));
    assert_eq!(bins.cumulative, -1);

    assert!(serde_json::from_str::<StackOptions>(r#"{"offset": "sideways"}"#).is_err());
}
