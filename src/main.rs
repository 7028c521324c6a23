use anyhow::Error;
use rand::Rng;
use std::time::Instant;

use colmenadb::io::{ArrayStore, LocalArrayStore};
use colmenadb::ivf::SearchParams;
use colmenadb::ivf::index::build_index;
use colmenadb::ivf::query::search;
use colmenadb::linalg::SquaredL2;
use colmenadb::matrix::ColMajorMatrix;

fn main() -> Result<(), Error> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1) {
        None => generate("testdb"),
        Some(s) if s == "generate" => generate(
            args.get(2).map(String::as_str).unwrap_or("testdb"),
        ),
        Some(s) if s == "query" => query(&args[2]),
        _ => {
            println!("usage: {} [generate|query] [path]", args[0]);
            Ok(())
        },
    }
}

fn generate(path: &str) -> Result<(), Error> {
    const N: usize = 5000; // number of vectors
    const M: usize = 128; // vector size
    const P: usize = 50; // number of partitions
    // prepares the data
    let time = Instant::now();
    let mut rng = rand::thread_rng();
    let mut data = vec![0.0f32; N * M];
    rng.fill(&mut data[..]);
    let db = ColMajorMatrix::from_vec(data, M)?;
    // samples centroids from the data; training is up to the caller
    let mut centroid_data: Vec<f32> = Vec::with_capacity(P * M);
    for i in 0..P {
        centroid_data.extend_from_slice(db.col(i * (N / P)));
    }
    let centroids = ColMajorMatrix::from_vec(centroid_data, M)?;
    println!("prepared data in {} μs", time.elapsed().as_micros());
    // builds the index
    let time = Instant::now();
    let store = LocalArrayStore::new(path);
    store.write_matrix(&centroids, "centroids", 0, true)?;
    build_index::<f32, f32, u64, u64, _, _>(
        &store,
        &db,
        "centroids",
        "parts",
        "index",
        "ids",
        0,
        0,
        &SquaredL2,
    )?;
    println!("built index in {} μs", time.elapsed().as_micros());
    query(path)
}

fn query(path: &str) -> Result<(), Error> {
    const K: usize = 10; // K-nearest neighbors
    const NPROBE: usize = 5; // number of partitions to probe
    const Q: usize = 4; // number of query vectors
    // loads the query-side artifacts
    let time = Instant::now();
    let store = LocalArrayStore::new(path);
    let centroids: ColMajorMatrix<f32> = store.open_matrix("centroids")?;
    let indices: Vec<u64> = store.read_vector("index")?;
    println!("loaded index in {} μs", time.elapsed().as_micros());
    // creates random query vectors
    let mut rng = rand::thread_rng();
    let mut data = vec![0.0f32; Q * centroids.num_rows()];
    rng.fill(&mut data[..]);
    let queries = ColMajorMatrix::from_vec(data, centroids.num_rows())?;
    // queries k-NN
    let params = SearchParams::new(K.try_into()?, NPROBE.try_into()?);
    let time = Instant::now();
    let top_k: ColMajorMatrix<u64> = search(
        &store,
        "parts",
        &centroids,
        &queries,
        &indices,
        "ids",
        &params,
        &SquaredL2,
    )?;
    println!("queried k-NN in {} μs", time.elapsed().as_micros());
    for j in 0..top_k.num_cols() {
        println!("{}: {:?}", j, top_k.col(j));
    }
    Ok(())
}
