//! Test suite for the lazy page allocation lab.

use std::time::Duration;

use labgrade_common::{GradeResult, Runner, TestCase, TestRegistry, Template, check_pte_pa};

/// Expected `vmprint` output for the first process. Values are placeholders;
/// indentation depth and the PTE/PA relation are what is checked.
pub const PTE_PRINT: &str = "\
page table 0x0000000087f6e000
 ..0: pte 0x0000000021fda801 pa 0x0000000087f6a000
 .. ..0: pte 0x0000000021fda401 pa 0x0000000087f69000
 .. .. ..0: pte 0x0000000021fdac1f pa 0x0000000087f6b000
 .. .. ..1: pte 0x0000000021fda00f pa 0x0000000087f68000
 .. .. ..2: pte 0x0000000021fd9c1f pa 0x0000000087f67000
 ..255: pte 0x0000000021fdb401 pa 0x0000000087f6d000
 .. ..511: pte 0x0000000021fdb001 pa 0x0000000087f6c000
 .. .. ..510: pte 0x0000000021fdd807 pa 0x0000000087f76000
 .. .. ..511: pte 0x000000002000200b pa 0x0000000080008000";

pub const FS_IMAGE: &str = "fs.img";

/// `usertests` cases graded one by one, with their points.
pub const USERTEST_CASES: [(&str, u32); 7] = [
    ("pgbug", 4),
    ("sbrkbugs", 4),
    ("argptest", 4),
    ("sbrkmuch", 4),
    ("sbrkfail", 4),
    ("sbrkarg", 5),
    ("stacktest", 5),
];

pub const USERTEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const USERTESTS_ALL_TIMEOUT: Duration = Duration::from_secs(300);

const ALL_PASSED: &str = "^ALL TESTS PASSED$";

/// Declare the whole lab, in grading order.
pub fn register(reg: &mut TestRegistry<Runner>) -> GradeResult<()> {
    let template = Template::compile(PTE_PRINT)?;

    reg.register(TestCase::new(
        "lazytests",
        "running lazytests",
        0,
        |r: &mut Runner| {
            r.run_script(["lazytests"])?;
            Ok(())
        },
    ))?;

    reg.register(
        TestCase::new(
            "pte_printout",
            "lazy: pte printout",
            10,
            move |r: &mut Runner| {
                let rows = r.match_template(&template)?;
                // The first row is the page table header, with no PTE.
                for row in rows.iter().skip(1) {
                    check_pte_pa(&row.captures[0], &row.captures[1])?;
                }
                Ok(())
            },
        )
        .with_parent("lazytests"),
    )?;

    reg.register(
        TestCase::new("lazy_map", "lazy: map", 20, |r: &mut Runner| {
            r.match_regex("^test lazy unmap: OK$")?;
            Ok(())
        })
        .with_parent("lazytests"),
    )?;

    reg.register(
        TestCase::new("lazy_unmap", "lazy: unmap", 20, |r: &mut Runner| {
            // May share its line with the shell prompt.
            r.match_regex(".*test lazy alloc: OK$")?;
            Ok(())
        })
        .with_parent("lazytests"),
    )?;

    for (case, points) in USERTEST_CASES {
        reg.register(
            TestCase::new(
                format!("usertests_{case}"),
                format!("usertests: {case}"),
                points,
                move |r: &mut Runner| usertest_check(r, &format!("usertests {case}")),
            )
            .with_timeout(USERTEST_TIMEOUT),
        )?;
    }

    reg.register(
        TestCase::new(
            "usertests_all",
            "usertests: all tests",
            20,
            |r: &mut Runner| usertest_check(r, "usertests"),
        )
        .with_timeout(USERTESTS_ALL_TIMEOUT),
    )?;

    Ok(())
}

fn usertest_check(r: &mut Runner, command: &str) -> GradeResult<()> {
    r.rebuild_image(FS_IMAGE)?;
    r.run_script([command])?;
    r.match_regex(ALL_PASSED)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgrade_common::{Pattern, Scheduler};

    #[test]
    fn test_suite_shape() {
        let mut reg = TestRegistry::new();
        register(&mut reg).unwrap();
        reg.validate().unwrap();

        assert_eq!(reg.len(), 12);
        assert_eq!(reg.total_points(), 100);
        assert_eq!(reg.ids()[0], "lazytests");
        assert_eq!(reg.get("lazy_map").unwrap().parent(), Some("lazytests"));
        assert_eq!(
            reg.get("usertests_sbrkarg").unwrap().timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            reg.get("usertests_all").unwrap().timeout(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_template_matches_reference_printout() {
        let template = Template::compile(PTE_PRINT).unwrap();
        let rows = template.match_in_order(PTE_PRINT).unwrap();
        assert_eq!(rows.len(), 10);
        for row in rows.iter().skip(1) {
            check_pte_pa(&row.captures[0], &row.captures[1]).unwrap();
        }
    }

    #[test]
    fn test_unmap_pattern_tolerates_prompt_prefix() {
        let p = Pattern::regex(".*test lazy alloc: OK$").unwrap();
        assert!(p.is_match("$ test lazy alloc: OK\n"));
        assert!(!p.is_match("test lazy alloc: FAILED\n"));
    }

    #[test]
    fn test_filter_selects_lazy_group() {
        let mut reg = TestRegistry::new();
        register(&mut reg).unwrap();
        let selection = Scheduler::new(reg).with_filters(["lazy"]).selection().unwrap();
        assert_eq!(
            selection,
            vec!["lazytests", "pte_printout", "lazy_map", "lazy_unmap"]
        );
    }
}
