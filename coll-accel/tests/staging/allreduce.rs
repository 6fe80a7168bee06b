use super::helpers::{Event, FixedComm, Harness};
use coll_accel::{
    AccelColl, DataType, DeviceId, ReduceOp, SendBuf, SimAccelerator, ThreadGroup, TypeLayout,
};
use std::sync::Arc;

/// Run `f(rank, coll, group)` on `world_size` threads sharing one
/// `AccelColl` backed by a `ThreadGroup`.
fn run_ranks<T, F>(world_size: u32, sim: &Arc<SimAccelerator>, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(u32, &AccelColl, &ThreadGroup) -> T + Sync,
{
    let group = Arc::new(ThreadGroup::new(world_size));
    let coll = AccelColl::new(sim.clone(), group.clone());
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..world_size)
            .map(|rank| {
                let (f, coll, group) = (&f, &coll, &*group);
                s.spawn(move || f(rank, coll, group))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_allreduce_device_buffers_across_threads() {
    let sim = Arc::new(SimAccelerator::new());
    let layout = TypeLayout::contiguous(DataType::F32);

    let results = run_ranks(4, &sim, |rank, coll, group| {
        let send = vec![(rank + 1) as f32; 256];
        let mut recv = vec![0.0f32; 256];
        sim.register(DeviceId(rank), send.as_ptr() as u64, 1024)
            .unwrap();
        sim.register(DeviceId(rank), recv.as_ptr() as u64, 1024)
            .unwrap();
        let comm = group.comm(rank).unwrap();
        unsafe {
            coll.allreduce(
                SendBuf::Ptr(send.as_ptr() as u64),
                recv.as_mut_ptr() as u64,
                256,
                &layout,
                ReduceOp::Sum,
                &comm,
            )
            .unwrap();
        }
        sim.unregister(send.as_ptr() as u64);
        sim.unregister(recv.as_ptr() as u64);
        recv
    });

    for recv in results {
        assert_eq!(recv, vec![10.0f32; 256]);
    }
    let counts = sim.transfer_counts();
    assert_eq!(counts.device_to_host, 8);
    assert_eq!(counts.host_to_device, 4);
}

#[test]
fn test_reduce_across_threads_writes_root_only() {
    let sim = Arc::new(SimAccelerator::new());
    let layout = TypeLayout::contiguous(DataType::I32);

    let results = run_ranks(3, &sim, |rank, coll, group| {
        let send = vec![rank as i32 * 10 + 1; 64];
        let mut recv = vec![-7i32; 64];
        sim.register(DeviceId(0), send.as_ptr() as u64, 256).unwrap();
        sim.register(DeviceId(0), recv.as_ptr() as u64, 256).unwrap();
        let comm = group.comm(rank).unwrap();
        unsafe {
            coll.reduce(
                SendBuf::Ptr(send.as_ptr() as u64),
                recv.as_mut_ptr() as u64,
                64,
                &layout,
                ReduceOp::Max,
                1,
                &comm,
            )
            .unwrap();
        }
        sim.unregister(send.as_ptr() as u64);
        sim.unregister(recv.as_ptr() as u64);
        recv
    });

    assert_eq!(results[0], vec![-7i32; 64]);
    assert_eq!(results[1], vec![21i32; 64]);
    assert_eq!(results[2], vec![-7i32; 64]);
    let counts = sim.transfer_counts();
    assert_eq!(counts.device_to_host, 4);
    assert_eq!(counts.host_to_device, 1);
}

#[test]
fn test_allreduce_mixed_host_and_device_ranks() {
    let sim = Arc::new(SimAccelerator::new());
    let layout = TypeLayout::contiguous(DataType::U64);

    let results = run_ranks(2, &sim, |rank, coll, group| {
        let mut recv = vec![(rank as u64 + 1) * 3; 16];
        // Rank 1 keeps its buffer in host memory.
        if rank == 0 {
            sim.register(DeviceId(0), recv.as_ptr() as u64, 128).unwrap();
        }
        let comm = group.comm(rank).unwrap();
        unsafe {
            coll.allreduce(
                SendBuf::InPlace,
                recv.as_mut_ptr() as u64,
                16,
                &layout,
                ReduceOp::Prod,
                &comm,
            )
            .unwrap();
        }
        if rank == 0 {
            sim.unregister(recv.as_ptr() as u64);
        }
        recv
    });

    for recv in results {
        assert_eq!(recv, vec![18u64; 16]);
    }
}

#[test]
fn test_allreduce_stages_recv_on_every_rank() {
    let h = Harness::new();
    let layout = TypeLayout::contiguous(DataType::F32);
    let send = vec![4.0f32; 8];
    let mut recv = vec![0.0f32; 8];
    h.on_device(&send);
    h.on_device(&recv);
    let comm = FixedComm {
        rank: 1,
        world_size: 2,
    };

    unsafe {
        h.coll
            .allreduce(
                SendBuf::Ptr(send.as_ptr() as u64),
                recv.as_mut_ptr() as u64,
                8,
                &layout,
                ReduceOp::Sum,
                &comm,
            )
            .unwrap();
    }

    let allocs = h.log.allocs();
    assert_eq!(allocs.len(), 2);
    assert_eq!(h.log.transfers(), (2, 1));
    assert!(h.log.events().contains(&Event::Allreduce {
        send: SendBuf::Ptr(allocs[0].0),
        recv: allocs[1].0,
    }));
    assert_eq!(recv, send);
    h.assert_no_leaks();
}
