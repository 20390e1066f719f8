//! Generation of the two per-task shell scripts. `<uid>.launch.sh` runs
//! once, invokes the launcher and redirects task output; `<uid>.exec.sh`
//! is what the launcher starts per rank. The env-dump/diff dance in the
//! exec script keeps launcher-injected variables out of user `pre_exec`.

use skiff_core::task::Task;
use skiff_launch::{Barrier, LaunchMethod};

/// Quote one shell word, surviving embedded quotes and spaces.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Exit code the exec script reserves for a failed rank-0 `pre_exec`,
/// so the executor can tell it apart from a payload failure.
pub const PRE_EXEC_FAILED: i32 = 66;

/// Names of the per-task files inside the sandbox.
pub fn launch_script_name(uid: &str) -> String {
    format!("{uid}.launch.sh")
}

pub fn exec_script_name(uid: &str) -> String {
    format!("{uid}.exec.sh")
}

pub fn stdout_name(task: &Task) -> String {
    task.description
        .stdout
        .clone()
        .unwrap_or_else(|| format!("{}.out", task.uid))
}

pub fn stderr_name(task: &Task) -> String {
    task.description
        .stderr
        .clone()
        .unwrap_or_else(|| format!("{}.err", task.uid))
}

/// Environment dump the launch script writes before the launcher runs.
pub fn launch_env_dump_name(uid: &str) -> String {
    format!("{uid}.env.launch")
}

/// Environment dump each rank writes on entry to the exec script.
pub fn rank_env_dump_name(uid: &str, rank: usize) -> String {
    format!("{uid}.env.rank.{rank}")
}

fn barrier_flag(uid: &str) -> String {
    format!("{uid}.pre_exec_done")
}

/// The launch script: sandbox environment, cached launch-method prep,
/// `pre_launch`, env dump, the launcher line with task output
/// redirection, `post_launch`.
pub fn launch_script(
    task: &Task,
    lm: &dyn LaunchMethod,
    launch_argv: &[String],
    sandbox_env: &[(String, String)],
) -> String {
    let uid = &task.uid;
    let td = &task.description;
    let mut s = String::new();
    s.push_str("#!/bin/bash\n");
    s.push_str(&format!("# launch script for {uid} ({})\n\n", lm.name()));
    s.push_str("cd \"$(dirname \"$0\")\"\n");
    s.push_str(&format!("export SKIFF_TASK_ID={}\n", shell_quote(uid)));
    s.push_str("export SKIFF_TASK_SANDBOX=\"$PWD\"\n");
    for (k, v) in sandbox_env {
        s.push_str(&format!("export {k}={}\n", shell_quote(v)));
    }

    if !lm.pre_exec_cached().is_empty() {
        s.push('\n');
        for line in lm.pre_exec_cached() {
            s.push_str(line);
            s.push('\n');
        }
    }
    if !td.pre_launch.is_empty() {
        s.push('\n');
        for line in &td.pre_launch {
            s.push_str(line);
            s.push('\n');
        }
    }

    s.push_str(&format!("\nenv | sort > {}\n", shell_quote(&launch_env_dump_name(uid))));

    let launcher: Vec<String> = launch_argv.iter().map(|a| shell_quote(a)).collect();
    s.push_str(&format!(
        "\n{} 1> {} 2> {}\nSKIFF_RET=$?\n",
        launcher.join(" "),
        shell_quote(&stdout_name(task)),
        shell_quote(&stderr_name(task)),
    ));

    if !td.post_launch.is_empty() {
        s.push('\n');
        for line in &td.post_launch {
            s.push_str(line);
            s.push('\n');
        }
    }
    s.push_str("\nexit $SKIFF_RET\n");
    s
}

/// The per-rank wrapper. Reconstitutes the rank id, dumps the rank
/// environment, runs `pre_exec` once on rank 0 with launcher-injected
/// variables stripped, holds the other ranks at the method's barrier,
/// then hands over to the payload.
pub fn exec_script(task: &Task, lm: &dyn LaunchMethod) -> String {
    let uid = &task.uid;
    let td = &task.description;
    let mut s = String::new();
    s.push_str("#!/bin/bash\n");
    s.push_str(&format!("# rank wrapper for {uid}\n\n"));
    s.push_str("cd \"$(dirname \"$0\")\"\n");

    match lm.rank_id_var() {
        Some(var) => s.push_str(&format!("SKIFF_RANK=\"${{{var}:-0}}\"\n")),
        None => s.push_str("SKIFF_RANK=\"${SKIFF_RANK:-0}\"\n"),
    }
    s.push_str("export SKIFF_RANK\n");

    for (k, v) in &td.environment {
        s.push_str(&format!("export {k}={}\n", shell_quote(v)));
    }

    let rank_dump = format!("{uid}.env.rank.$SKIFF_RANK");
    s.push_str(&format!("env | sort > \"{rank_dump}\"\n"));
    s.push_str(&format!(
        "echo \"$(date +%s.%N),rank_start,$SKIFF_RANK\" >> {}\n",
        shell_quote(&format!("{uid}.prof"))
    ));

    let flag = barrier_flag(uid);
    let fs_barrier = lm.barrier() == Barrier::Filesystem;

    // Rank-0 section: pre_exec behind the env diff, then the barrier
    // flag when the method has no implicit MPI_Init barrier. Omitted
    // entirely when there is nothing to gate.
    if !td.pre_exec.is_empty() || fs_barrier {
        s.push_str("\nif [ \"$SKIFF_RANK\" = \"0\" ]; then\n");
        if !td.pre_exec.is_empty() {
            let prefixes = lm.injected_prefixes();
            if prefixes.is_empty() {
                s.push_str("    _SKIFF_INJECTED=\"\"\n");
            } else {
                let pattern = prefixes.join("|");
                s.push_str(&format!(
                    "    _SKIFF_INJECTED=$(comm -13 {} \"{rank_dump}\" | cut -d= -f1 | grep -E '^({pattern})' || true)\n",
                    shell_quote(&launch_env_dump_name(uid)),
                ));
            }
            s.push_str("    (\n");
            s.push_str("        for _v in $_SKIFF_INJECTED; do unset \"$_v\"; done\n");
            for line in &td.pre_exec {
                s.push_str(&format!("        {line}\n"));
            }
            s.push_str(&format!("    ) || exit {PRE_EXEC_FAILED}\n"));
        }
        if fs_barrier {
            s.push_str(&format!("    : > {}\n", shell_quote(&flag)));
            s.push_str("else\n");
            s.push_str(&format!(
                "    while [ ! -e {} ]; do sleep 0.1; done\n",
                shell_quote(&flag)
            ));
        }
        s.push_str("fi\n\n");
    }

    let mut payload = vec![shell_quote(&td.executable)];
    payload.extend(td.arguments.iter().map(|a| shell_quote(a)));
    if td.post_exec.is_empty() {
        s.push_str(&format!("exec {}\n", payload.join(" ")));
    } else {
        s.push_str(&format!("{}\nSKIFF_RET=$?\n\n", payload.join(" ")));
        for line in &td.post_exec {
            s.push_str(line);
            s.push('\n');
        }
        s.push_str("exit $SKIFF_RET\n");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::config::LaunchMethodOptions;
    use skiff_core::task::{Task, TaskDescription, ThreadingType};
    use skiff_launch::{Fork, Srun};

    fn fork() -> Fork {
        Fork::new(LaunchMethodOptions::default())
    }

    fn srun() -> Srun {
        Srun::new(LaunchMethodOptions {
            command: Some("/usr/bin/srun".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn task(pre_exec: Vec<String>) -> Task {
        Task::new(
            "task.0000",
            TaskDescription {
                executable: "/bin/echo".into(),
                arguments: vec!["hello world".into()],
                pre_exec,
                ..Default::default()
            },
        )
    }

    #[test]
    fn quote_passes_safe_words_and_wraps_the_rest() {
        assert_eq!(shell_quote("/bin/date"), "/bin/date");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn launch_script_redirects_task_output() {
        let t = task(vec![]);
        let argv = vec!["task.0000.exec.sh".to_string()];
        let script = launch_script(&t, &fork(), &argv, &[]);
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("env | sort > task.0000.env.launch"));
        assert!(script.contains("task.0000.exec.sh 1> task.0000.out 2> task.0000.err"));
        assert!(script.contains("exit $SKIFF_RET"));
    }

    #[test]
    fn exec_script_uses_launcher_rank_variable() {
        let script = exec_script(&task(vec![]), &srun());
        assert!(script.contains("SKIFF_RANK=\"${SLURM_PROCID:-0}\""));
        assert!(script.contains(">> task.0000.prof"));
        // No pre_exec: no diff machinery, and MPI barrier means no flag file.
        assert!(!script.contains("comm -13"));
        assert!(!script.contains("pre_exec_done"));
        assert!(script.contains("exec /bin/echo 'hello world'"));
    }

    #[test]
    fn rank0_pre_exec_strips_injected_vars() {
        let script = exec_script(&task(vec!["module load x".into()]), &srun());
        assert!(script.contains("if [ \"$SKIFF_RANK\" = \"0\" ]; then"));
        assert!(script.contains("comm -13 task.0000.env.launch"));
        assert!(script.contains("grep -E '^(SLURM_|SLURMD_|PMI_|PMIX_)'"));
        assert!(script.contains("for _v in $_SKIFF_INJECTED; do unset \"$_v\"; done"));
        assert!(script.contains("module load x"));
    }

    #[test]
    fn filesystem_barrier_gates_other_ranks() {
        let script = exec_script(&task(vec!["touch prepped".into()]), &fork());
        assert!(script.contains(": > task.0000.pre_exec_done"));
        assert!(script.contains("while [ ! -e task.0000.pre_exec_done ]; do sleep 0.1; done"));
    }

    #[test]
    fn post_exec_preserves_payload_exit_code() {
        let mut t = task(vec![]);
        t.description.post_exec = vec!["date >> done.log".into()];
        let script = exec_script(&t, &fork());
        assert!(!script.contains("exec /bin/echo"));
        assert!(script.contains("SKIFF_RET=$?"));
        assert!(script.contains("exit $SKIFF_RET"));
    }

    #[test]
    fn mpi_task_env_exports_land_in_exec_script() {
        let mut t = task(vec![]);
        t.description.threading = ThreadingType::Mpi;
        t.description.environment.insert("OMP_NUM_THREADS".into(), "4".into());
        let script = exec_script(&t, &srun());
        assert!(script.contains("export OMP_NUM_THREADS=4"));
    }
}
